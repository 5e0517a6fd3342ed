use std::any::Any;
use std::fmt;

/// Kind name of faults synthesized for an expired deadline.
pub const TIMEOUT_KIND: &str = "TimeoutExceeded";

/// Kind name of faults recovered from a panic inside an operation.
pub const PANIC_KIND: &str = "Panic";

/// Fault raised while replaying an operation, or synthesized by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    kind: Box<str>,
    message: String,
}

impl Fault {
    pub fn new<T: AsRef<str>>(kind: T, message: impl Into<String>) -> Self {
        Self {
            kind: crate::utils::to_boxed_str(kind),
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(TIMEOUT_KIND, "test execution time exceeded")
    }

    /// Recover a fault from the payload of a caught panic.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self::new(PANIC_KIND, message)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_timeout(&self) -> bool {
        &*self.kind == TIMEOUT_KIND
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}
