//! Tests, operations and the runtime values they produce.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::tracer::Tracer;

/// Faults raised by operations.
pub mod fault;
/// Variable bindings of one execution.
pub mod scope;
/// Static types of variables.
pub mod types;
/// Runtime values.
pub mod value;

pub use fault::Fault;
pub use scope::{Scope, ScopeError, VarRef};
pub use types::Type;
pub use value::{ArrayValue, ObjectValue, Value};

/// Outcome of an operation other than success.
#[derive(Debug, Error)]
pub enum OpError {
    /// Raised by the program under test, part of the normal result.
    #[error("{0}")]
    Fault(Arc<Fault>),
    /// Inconsistency of the harness itself, aborts the run.
    #[error("internal: {0}")]
    Internal(String),
    #[error("scope: {0}")]
    Scope(#[from] ScopeError),
}

impl From<Fault> for OpError {
    fn from(f: Fault) -> Self {
        OpError::Fault(Arc::new(f))
    }
}

impl From<Arc<Fault>> for OpError {
    fn from(f: Arc<Fault>) -> Self {
        OpError::Fault(f)
    }
}

/// One step of a test.
pub trait Operation: Send + Sync {
    /// Run the operation, results are bound into `scope`.
    fn execute(&self, scope: &mut Scope, tracer: &Tracer) -> Result<(), OpError>;

    /// Short textual form, used in logs and observer events.
    fn code(&self) -> String;
}

/// Operation backed by a closure.
pub struct FnOperation<F> {
    code: String,
    f: F,
}

impl<F> FnOperation<F>
where
    F: Fn(&mut Scope, &Tracer) -> Result<(), OpError> + Send + Sync,
{
    pub fn new(code: impl Into<String>, f: F) -> Self {
        Self {
            code: code.into(),
            f,
        }
    }
}

impl<F> Operation for FnOperation<F>
where
    F: Fn(&mut Scope, &Tracer) -> Result<(), OpError> + Send + Sync,
{
    fn execute(&self, scope: &mut Scope, tracer: &Tracer) -> Result<(), OpError> {
        (self.f)(scope, tracer)
    }

    fn code(&self) -> String {
        self.code.clone()
    }
}

/// Ordered sequence of operations.
#[derive(Default)]
pub struct Test {
    ops: Vec<Box<dyn Operation>>,
}

impl Test {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<O: Operation + 'static>(&mut self, op: O) -> &mut Self {
        self.ops.push(Box::new(op));
        self
    }

    /// Append a closure operation.
    pub fn push_fn<F>(&mut self, code: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&mut Scope, &Tracer) -> Result<(), OpError> + Send + Sync + 'static,
    {
        self.push(FnOperation::new(code, f))
    }

    pub fn ops(&self) -> &[Box<dyn Operation>] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in self.ops.iter() {
            writeln!(f, "{}", op.code())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.ops.iter().map(|op| op.code()))
            .finish()
    }
}
