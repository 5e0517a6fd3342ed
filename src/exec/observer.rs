use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::{Fault, Scope};

/// One operation of the replayed test, as seen by observers.
pub struct OperationEvent<'a> {
    pub position: usize,
    pub code: &'a str,
    /// Bindings at the time of the event, read only.
    pub scope: &'a Scope,
}

/// End of a replay.
pub struct RunSummary<'a> {
    pub test_len: usize,
    pub executed: usize,
    pub faults: &'a BTreeMap<usize, Arc<Fault>>,
    pub scope: &'a Scope,
}

/// Side channel into the replay of a test.
///
/// Notifications arrive on the worker thread with tracing suspended.
pub trait ExecutionObserver: Send + Sync {
    fn before_operation(&self, _event: &OperationEvent<'_>) {}

    fn after_operation(&self, event: &OperationEvent<'_>, fault: Option<&Fault>);

    fn on_finished(&self, _summary: &RunSummary<'_>) {}

    /// Called before every run.
    fn clear(&self) {}
}
