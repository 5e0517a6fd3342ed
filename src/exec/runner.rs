//! Replay of a test on the worker thread.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::observer::{ExecutionObserver, OperationEvent, RunSummary};
use super::ExecError;
use crate::model::{Fault, OpError, Scope, Test};
use crate::tracer::{probe, Cancelled, RunControl, Tracer};
use crate::utils::relock;

/// Faults and progress recorded so far, readable by the harness while the
/// worker is still running.
#[derive(Debug, Clone, Default)]
pub(crate) struct Progress {
    pub faults: BTreeMap<usize, Arc<Fault>>,
    pub explicit: BTreeMap<usize, bool>,
    pub executed: usize,
}

impl Progress {
    fn record(&mut self, position: usize, fault: Arc<Fault>, explicit: bool) {
        self.faults.insert(position, fault);
        self.explicit.insert(position, explicit);
    }
}

/// How a replay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunEnd {
    Completed,
    /// Replay stopped at the fault at this position.
    Faulted(usize),
    TimedOut,
}

pub(crate) struct TestRunner {
    pub test: Arc<Test>,
    pub tracer: Arc<Tracer>,
    pub observers: Vec<Arc<dyn ExecutionObserver>>,
    pub control: Arc<RunControl>,
    pub progress: Arc<Mutex<Progress>>,
    pub break_on_fault: bool,
}

impl TestRunner {
    pub fn run(self) -> Result<RunEnd, ExecError> {
        let _binding = probe::bind(Arc::clone(&self.tracer), Arc::clone(&self.control));
        let mut scope = Scope::new();
        let len = self.test.len();
        let mut end = RunEnd::Completed;

        for (pos, op) in self.test.ops().iter().enumerate() {
            if self.control.is_interrupted() {
                worker_debug!("interrupted before operation {}", pos);
                self.record_timeout(len);
                end = RunEnd::TimedOut;
                break;
            }
            self.tracer.operation_executed();
            let code = op.code();
            self.notify(|o| {
                o.before_operation(&OperationEvent {
                    position: pos,
                    code: &code,
                    scope: &scope,
                })
            });

            let ret = catch_unwind(AssertUnwindSafe(|| op.execute(&mut scope, &self.tracer)));
            let fault = match ret {
                Ok(Ok(())) => None,
                Ok(Err(OpError::Fault(f))) => Some(f),
                Ok(Err(OpError::Internal(msg))) => {
                    return Err(ExecError::Internal { position: pos, msg });
                }
                Ok(Err(OpError::Scope(e))) => {
                    return Err(ExecError::Scope {
                        position: pos,
                        source: e,
                    });
                }
                Err(payload) if payload.is::<Cancelled>() => {
                    worker_debug!("operation {} cancelled", pos);
                    relock(self.progress.lock()).executed = pos + 1;
                    self.record_timeout(len);
                    end = RunEnd::TimedOut;
                    break;
                }
                Err(payload) => Some(Arc::new(Fault::from_panic(&*payload))),
            };

            if let Some(f) = fault.as_ref() {
                let explicit = self.tracer.is_explicit(f);
                relock(self.progress.lock()).record(pos, Arc::clone(f), explicit);
            }
            relock(self.progress.lock()).executed = pos + 1;
            self.notify(|o| {
                o.after_operation(
                    &OperationEvent {
                        position: pos,
                        code: &code,
                        scope: &scope,
                    },
                    fault.as_deref(),
                )
            });

            if fault.is_some() {
                end = RunEnd::Faulted(pos);
                if self.break_on_fault {
                    break;
                }
            }
        }

        // the last operation returned on its own after an interrupt.
        if end != RunEnd::TimedOut && self.control.is_interrupted() {
            worker_debug!("interrupted after operation {}", relock(self.progress.lock()).executed);
            self.record_timeout(len);
            end = RunEnd::TimedOut;
        }

        let progress = relock(self.progress.lock()).clone();
        if self.control.is_abandoned() {
            worker_warn!("abandoned run returned after {} operations", progress.executed);
        }
        self.notify(|o| {
            o.on_finished(&RunSummary {
                test_len: len,
                executed: progress.executed,
                faults: &progress.faults,
                scope: &scope,
            })
        });
        Ok(end)
    }

    fn record_timeout(&self, len: usize) {
        relock(self.progress.lock()).record(len, Arc::new(Fault::timeout()), false);
    }

    /// Notify observers with tracing suspended, nothing is delivered for an
    /// abandoned run.
    ///
    /// Observers may reach instrumented code, a cancellation raised there
    /// ends the notification, the replay loop picks up the interrupt.
    fn notify<F: Fn(&dyn ExecutionObserver)>(&self, f: F) {
        if self.control.is_abandoned() {
            return;
        }
        let _suspended = self.tracer.suspend();
        for (i, o) in self.observers.iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(o.as_ref()))) {
                if payload.is::<Cancelled>() {
                    worker_debug!("observer {} cancelled", i);
                    return;
                }
                resume_unwind(payload);
            }
        }
    }
}
