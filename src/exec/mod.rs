//! Execution harness.
//!
//! An `Executor` replays one test at a time on a dedicated worker thread
//! and blocks the caller until the worker answers or the deadline expires.
//! Expired runs are cancelled in steps: the tracer's kill switch first, the
//! run's interrupt flag after a grace period and, if the worker still does
//! not return, the worker is abandoned and replaced. Arbitrary code can not
//! be stopped preemptively, an abandoned worker keeps its thread until the
//! code it runs returns on its own.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::model::{Fault, ScopeError, Test};
use crate::stats::*;
use crate::trace::{TraceConf, TraceError};
use crate::tracer::{RunControl, Tracer};
use crate::utils::relock;
use runner::{Progress, RunEnd, TestRunner};
use timeout::{Deadline, Waited};
use worker::{StalledWorkers, Worker, WORKER_THREAD_PREFIX};

/// Observers of the replay.
pub mod observer;
/// Outcome of one execution.
pub mod result;
/// Replay loop on the worker.
mod runner;
/// Deadline enforcement.
pub mod timeout;
/// Worker threads.
pub mod worker;

pub use observer::{ExecutionObserver, OperationEvent, RunSummary};
pub use result::ExecutionResult;

/// Internal error of one execution, the result can not be trusted.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Operation reported an inconsistency of the harness.
    #[error("operation {position}: {msg}")]
    Internal { position: usize, msg: String },
    #[error("operation {position}: {source}")]
    Scope {
        position: usize,
        #[source]
        source: ScopeError,
    },
    #[error("trace: {0}")]
    Trace(#[from] TraceError),
    /// Worker thread died without answering.
    #[error("worker-{0} lost")]
    WorkerLost(u64),
    #[error("spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
}

/// Configuration of an executor.
#[derive(Debug, Clone)]
pub struct ExecConf {
    /// Default time budget of one run.
    pub timeout: Duration,
    /// Grace period of every cancellation step.
    pub shutdown_timeout: Duration,
    /// Measure the budget in cpu time of the worker, if the platform allows.
    pub cpu_timeout: bool,
    /// Wall clock ceiling of cpu time mode, as a multiple of the budget.
    pub cpu_wall_factor: u32,
    /// Grace periods granted while the worker is in an initialization region.
    pub init_patience: u32,
    /// Stop replay at the first fault of the program under test.
    pub break_on_fault: bool,
    /// Ignore instrumentation events of threads other than the worker.
    pub check_caller_thread: bool,
    /// Let panics of operations print to stderr.
    pub print_to_system: bool,
    pub trace: TraceConf,
}

impl Default for ExecConf {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            shutdown_timeout: Duration::from_millis(1000),
            cpu_timeout: false,
            cpu_wall_factor: 10,
            init_patience: 10,
            break_on_fault: true,
            check_caller_thread: true,
            print_to_system: false,
            trace: TraceConf::default(),
        }
    }
}

impl ExecConf {
    pub fn check(&self) -> Result<(), ExecError> {
        if self.timeout.is_zero() {
            return Err(ExecError::Config("timeout must be positive".to_string()));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ExecError::Config(
                "shutdown timeout must be positive".to_string(),
            ));
        }
        if self.cpu_timeout && self.cpu_wall_factor == 0 {
            return Err(ExecError::Config(
                "cpu wall factor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

static MUTE_WORKER_PANICS: AtomicBool = AtomicBool::new(false);
static PANIC_HOOK: Once = Once::new();

/// Keep panics of operations on worker threads off stderr.
fn mute_worker_panics(mute: bool) {
    MUTE_WORKER_PANICS.store(mute, Ordering::Relaxed);
    if !mute {
        return;
    }
    PANIC_HOOK.call_once(|| {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let on_worker = thread::current()
                .name()
                .map_or(false, |n| n.starts_with(WORKER_THREAD_PREFIX));
            if on_worker && MUTE_WORKER_PANICS.load(Ordering::Relaxed) {
                return;
            }
            prev(info)
        }));
    });
}

/// Harness running tests under a deadline.
pub struct Executor {
    conf: ExecConf,
    tracer: Arc<Tracer>,
    worker: Option<Worker>,
    next_worker_id: u64,
    observers: Vec<Arc<dyn ExecutionObserver>>,
    stalled: Arc<StalledWorkers>,
    stats: Arc<Stats>,
}

impl Executor {
    pub fn new(conf: ExecConf) -> Result<Self, ExecError> {
        let tracer = Arc::new(Tracer::new(conf.trace));
        Self::with_tracer(conf, tracer)
    }

    /// Executor reporting to an existing tracer, e.g. one resolving def/use ids.
    pub fn with_tracer(conf: ExecConf, tracer: Arc<Tracer>) -> Result<Self, ExecError> {
        conf.check()?;
        mute_worker_panics(!conf.print_to_system);
        tracer.set_check_caller_thread(conf.check_caller_thread);
        tracer.disable();
        Ok(Self {
            conf,
            tracer,
            worker: None,
            next_worker_id: 0,
            observers: Vec::new(),
            stalled: Arc::new(StalledWorkers::new()),
            stats: Arc::new(Stats::new()),
        })
    }

    pub fn conf(&self) -> &ExecConf {
        &self.conf
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }

    pub fn clear_observers(&mut self) {
        self.observers.clear();
    }

    /// Number of abandoned workers that are still running.
    pub fn stalled_workers(&self) -> usize {
        self.stalled.count()
    }

    /// Shared handle of the abandoned workers, readable from any thread.
    pub fn stalled(&self) -> &Arc<StalledWorkers> {
        &self.stalled
    }

    /// Run `test` with the configured timeout.
    pub fn execute(&mut self, test: &Arc<Test>) -> Result<ExecutionResult, ExecError> {
        let timeout = self.conf.timeout;
        self.run(test, timeout)
    }

    /// Run `test`, giving up after `timeout`.
    pub fn run(&mut self, test: &Arc<Test>, timeout: Duration) -> Result<ExecutionResult, ExecError> {
        let start = Instant::now();
        self.stats.inc(EXEC_TOTAL);
        self.tracer.clear();
        self.tracer.set_kill_switch(false);
        for o in self.observers.iter() {
            o.clear();
        }

        let ret = self.run_inner(test, timeout);

        // stale events of a leaked worker must not reach the next run.
        self.tracer.disable();
        self.tracer.register_worker(None);
        let trace = self.tracer.take_trace();
        let observations = self.tracer.take_observations();
        self.tracer.set_kill_switch(false);
        let pending = self.tracer.take_error();

        let duration = start.elapsed();
        self.stats.add_time(duration);
        let progress = match ret.and_then(|p| pending.map_or(Ok(p), |e| Err(e.into()))) {
            Ok(p) => p,
            Err(e) => {
                self.stats.inc(EXEC_INTERNAL_ERRORS);
                log::warn!("execution failed: {}", e);
                return Err(e);
            }
        };
        if progress.faults.keys().any(|&pos| pos < test.len()) {
            self.stats.inc(EXEC_FAULTS);
        }
        self.stats.add(EXEC_OPERATIONS, progress.executed as u64);
        Ok(ExecutionResult::new(
            test.len(),
            progress.faults,
            progress.explicit,
            progress.executed,
            duration,
            trace,
            observations,
        ))
    }

    fn worker(&mut self) -> Result<&Worker, ExecError> {
        let gone = self.worker.as_ref().map_or(true, |w| !w.is_alive());
        if gone {
            if let Some(old) = self.worker.take() {
                log::info!("worker-{} exited, restarting", old.id());
            }
            let id = self.next_worker_id;
            self.next_worker_id += 1;
            self.worker = Some(Worker::spawn(id)?);
            self.stats.inc(WORKER_SPAWNED);
        }
        self.worker
            .as_ref()
            .ok_or_else(|| ExecError::WorkerLost(self.next_worker_id))
    }

    fn run_inner(&mut self, test: &Arc<Test>, timeout: Duration) -> Result<Progress, ExecError> {
        let progress = Arc::new(Mutex::new(Progress::default()));
        let control = Arc::new(RunControl::default());
        let runner = TestRunner {
            test: Arc::clone(test),
            tracer: Arc::clone(&self.tracer),
            observers: self.observers.clone(),
            control: Arc::clone(&control),
            progress: Arc::clone(&progress),
            break_on_fault: self.conf.break_on_fault,
        };
        let (tx, rx) = sync_channel(1);
        let job = Box::new(move || {
            let ret = catch_unwind(AssertUnwindSafe(|| runner.run())).unwrap_or_else(|payload| {
                let fault = Fault::from_panic(&*payload);
                Err(ExecError::Internal {
                    position: 0,
                    msg: format!("replay panicked outside operations: {}", fault.message()),
                })
            });
            let _ = tx.send(ret);
        });

        let (worker_id, worker_thread, cpu_clock) = {
            let w = self.worker()?;
            (w.id(), w.thread_id(), w.cpu_clock())
        };
        self.tracer.register_worker(Some(worker_thread));
        self.tracer.enable();
        let deadline = if self.conf.cpu_timeout {
            Deadline::cpu(timeout, cpu_clock, self.conf.cpu_wall_factor)
        } else {
            Deadline::wall(timeout)
        };
        let submitted = self.worker.as_ref().map(|w| w.submit(job));
        if !matches!(submitted, Some(Ok(()))) {
            self.worker = None;
            return Err(ExecError::WorkerLost(worker_id));
        }

        match timeout::wait(&rx, &deadline) {
            Waited::Done(ret) => {
                ret?;
            }
            Waited::Lost => {
                self.worker = None;
                return Err(ExecError::WorkerLost(worker_id));
            }
            Waited::Expired => {
                log::debug!("worker-{}: deadline of {:?} expired", worker_id, timeout);
                let timed_out = match self.cancel(&rx, &control, worker_id) {
                    // an internal error is still an error, even late.
                    Some(ret) => ret? == RunEnd::TimedOut,
                    None => true,
                };
                if !timed_out {
                    let p = relock(progress.lock()).clone();
                    return Ok(p);
                }
                self.stats.inc(EXEC_TIMEOUTS);
                let len = test.len();
                relock(progress.lock())
                    .faults
                    .entry(len)
                    .or_insert_with(|| Arc::new(Fault::timeout()));
                relock(progress.lock()).explicit.entry(len).or_insert(false);
            }
        }
        let p = relock(progress.lock()).clone();
        Ok(p)
    }

    /// Stop the worker of an expired run, returns its answer if it stopped.
    fn cancel(
        &mut self,
        rx: &std::sync::mpsc::Receiver<Result<RunEnd, ExecError>>,
        control: &RunControl,
        worker_id: u64,
    ) -> Option<Result<RunEnd, ExecError>> {
        let grace = self.conf.shutdown_timeout;
        self.tracer.set_kill_switch(true);
        if let Waited::Done(ret) = timeout::wait_for(rx, grace) {
            return Some(ret);
        }

        let mut patience = 0;
        while self.tracer.in_init_region() && patience < self.conf.init_patience {
            log::debug!("worker-{} is initializing, extending patience", worker_id);
            self.stats.inc(WORKER_INIT_PATIENCE);
            self.tracer.set_kill_switch(false);
            if let Waited::Done(ret) = timeout::wait_for(rx, grace) {
                return Some(ret);
            }
            patience += 1;
        }

        self.tracer.set_kill_switch(true);
        control.interrupt();
        if let Waited::Done(ret) = timeout::wait_for(rx, grace) {
            return Some(ret);
        }

        control.abandon();
        self.retire_worker();
        None
    }

    /// Abandon the current worker, the next run spawns a fresh one.
    fn retire_worker(&mut self) {
        if let Some(w) = self.worker.take() {
            log::warn!(
                "worker-{} did not stop after forced cancellation, abandoning it",
                w.id()
            );
            self.stats.inc(WORKER_STALLED);
            self.stalled.insert(w);
        }
    }
}

#[cfg(test)]
mod tests;
