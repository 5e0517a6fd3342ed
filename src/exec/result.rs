use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::model::Fault;
use crate::trace::Trace;
use crate::tracer::Observations;

/// Outcome of one test execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    test_len: usize,
    faults: BTreeMap<usize, Arc<Fault>>,
    explicit: BTreeMap<usize, bool>,
    executed: usize,
    duration: Duration,
    trace: Trace,
    observations: Observations,
}

impl ExecutionResult {
    pub(crate) fn new(
        test_len: usize,
        faults: BTreeMap<usize, Arc<Fault>>,
        explicit: BTreeMap<usize, bool>,
        executed: usize,
        duration: Duration,
        trace: Trace,
        observations: Observations,
    ) -> Self {
        Self {
            test_len,
            faults,
            explicit,
            executed,
            duration,
            trace,
            observations,
        }
    }

    /// Faults by operation position, a timeout sits just past the last operation.
    pub fn faults(&self) -> &BTreeMap<usize, Arc<Fault>> {
        &self.faults
    }

    pub fn fault_at(&self, position: usize) -> Option<&Arc<Fault>> {
        self.faults.get(&position)
    }

    pub fn first_fault_position(&self) -> Option<usize> {
        self.faults.keys().next().copied()
    }

    pub fn has_fault(&self) -> bool {
        !self.faults.is_empty()
    }

    /// Whether the fault at `position` was raised on purpose by the program under test.
    pub fn is_explicit(&self, position: usize) -> bool {
        self.explicit.get(&position).copied().unwrap_or(false)
    }

    pub fn has_timeout(&self) -> bool {
        self.faults
            .get(&self.test_len)
            .map_or(false, |f| f.is_timeout())
    }

    pub fn executed_operations(&self) -> usize {
        self.executed
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn read_resources(&self) -> impl Iterator<Item = &str> {
        self.observations.read_resources.iter().map(|r| &**r)
    }

    pub fn was_resource_written(&self) -> bool {
        self.observations.resource_written
    }

    pub fn test_len(&self) -> usize {
        self.test_len
    }
}
