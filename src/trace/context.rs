use std::fmt;

use super::call::MethodCall;

/// Shape of the active call stack at the time of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CallContext {
    frames: Box<[Box<str>]>,
}

impl CallContext {
    /// Context of the given call stack, the bottom frame is ignored.
    pub(crate) fn of_stack(stack: &[MethodCall]) -> Self {
        let frames = stack
            .iter()
            .filter(|c| !c.is_main())
            .map(|c| format!("{}.{}", c.class_name, c.method_name).into_boxed_str())
            .collect::<Vec<_>>();
        Self {
            frames: frames.into_boxed_slice(),
        }
    }

    pub fn from_frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            frames: frames
                .into_iter()
                .map(crate::utils::to_boxed_str)
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    pub fn frames(&self) -> &[Box<str>] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i != 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}", frame)?;
        }
        Ok(())
    }
}
