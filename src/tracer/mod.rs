//! Facade the instrumentation reports to.
//!
//! A `Tracer` owns the trace of the current execution. Events are folded in
//! only while the tracer is enabled and only when they come from the worker
//! thread registered for the current execution, stale threads of abandoned
//! runs can not pollute a later trace.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use rustc_hash::FxHashSet;

use crate::model::Fault;
use crate::trace::call::BranchId;
use crate::trace::defuse::{DefUseId, DefUseTable};
use crate::trace::distance::Identity;
use crate::trace::{hash_rendering, MutantId, Predicate, Trace, TraceConf, TraceError};
use crate::utils::{relock, to_boxed_str};

/// Thread-local access for instrumented code.
pub mod probe;

/// Unwind payload used to cancel a running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Unwind the current thread with a [`Cancelled`] payload.
///
/// Does nothing if the thread is already unwinding.
pub fn cancel() {
    if !thread::panicking() {
        std::panic::resume_unwind(Box::new(Cancelled));
    }
}

/// Out-of-band observations of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations {
    pub read_resources: FxHashSet<Box<str>>,
    pub resource_written: bool,
}

/// Per-run flags shared by the harness and the worker executing the run.
#[derive(Debug, Default)]
pub struct RunControl {
    interrupted: AtomicBool,
    abandoned: AtomicBool,
}

impl RunControl {
    /// Ask the worker to stop, honored at the next probe or operation boundary.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// The harness gave up on the worker, nothing it produces is wanted.
    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        self.interrupt();
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Relaxed)
    }
}

struct State {
    trace: Trace,
    worker: Option<ThreadId>,
    pending: Option<TraceError>,
    observations: Observations,
}

/// Collector of instrumentation events.
pub struct Tracer {
    conf: TraceConf,
    enabled: AtomicBool,
    kill_switch: AtomicBool,
    check_thread: AtomicBool,
    /// Nesting depth of irrevocable initialization on the worker.
    init_depth: AtomicUsize,
    generation: AtomicU64,
    operations: AtomicUsize,
    def_use: Option<Arc<dyn DefUseTable>>,
    state: Mutex<State>,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(TraceConf::default())
    }
}

impl Tracer {
    pub fn new(conf: TraceConf) -> Self {
        Self {
            conf,
            enabled: AtomicBool::new(false),
            kill_switch: AtomicBool::new(false),
            check_thread: AtomicBool::new(true),
            init_depth: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            operations: AtomicUsize::new(0),
            def_use: None,
            state: Mutex::new(State {
                trace: Trace::new(conf),
                worker: None,
                pending: None,
                observations: Observations::default(),
            }),
        }
    }

    /// Resolve def/use ids through `table`.
    pub fn with_def_use(mut self, table: Arc<dyn DefUseTable>) -> Self {
        self.def_use = Some(table);
        self
    }

    pub fn conf(&self) -> TraceConf {
        self.conf
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disable tracing until the returned guard is dropped.
    pub fn suspend(&self) -> Suspended<'_> {
        let was_enabled = self.enabled.swap(false, Ordering::SeqCst);
        Suspended {
            tracer: self,
            was_enabled,
        }
    }

    pub fn set_kill_switch(&self, on: bool) {
        self.kill_switch.store(on, Ordering::SeqCst);
    }

    pub fn is_kill_switch_set(&self) -> bool {
        self.kill_switch.load(Ordering::Relaxed)
    }

    /// Accept events from any thread, for embedding without a worker.
    pub fn set_check_caller_thread(&self, check: bool) {
        self.check_thread.store(check, Ordering::SeqCst);
    }

    /// Register the thread whose events are traced, `None` rejects all threads.
    pub fn register_worker(&self, worker: Option<ThreadId>) {
        relock(self.state.lock()).worker = worker;
    }

    pub fn worker(&self) -> Option<ThreadId> {
        relock(self.state.lock()).worker
    }

    fn is_worker(&self, state: &State) -> bool {
        !self.check_thread.load(Ordering::Relaxed) || state.worker == Some(thread::current().id())
    }

    /// Install an empty trace and forget everything about the previous run.
    pub fn clear(&self) {
        let mut state = relock(self.state.lock());
        state.trace = Trace::new(self.conf);
        state.pending = None;
        state.observations = Observations::default();
        self.operations.store(0, Ordering::SeqCst);
        self.init_depth.store(0, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Finish open call frames and hand out the current trace, an empty one
    /// takes its place.
    pub fn take_trace(&self) -> Trace {
        let mut state = relock(self.state.lock());
        let mut trace = std::mem::replace(&mut state.trace, Trace::new(self.conf));
        trace.finish_calls();
        trace
    }

    /// Cheap copy of the current trace.
    pub fn snapshot(&self) -> Trace {
        relock(self.state.lock()).trace.lazy_clone()
    }

    /// First bookkeeping error of the current run.
    pub fn take_error(&self) -> Option<TraceError> {
        relock(self.state.lock()).pending.take()
    }

    pub fn take_observations(&self) -> Observations {
        std::mem::take(&mut relock(self.state.lock()).observations)
    }

    /// Whether `fault` is the one the program under test raised on purpose.
    pub fn is_explicit(&self, fault: &Arc<Fault>) -> bool {
        relock(self.state.lock())
            .trace
            .explicit_fault()
            .map_or(false, |f| Arc::ptr_eq(f, fault))
    }

    pub fn operation_executed(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Operations started since the last `clear`.
    pub fn operations_executed(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    /// Enter an irrevocable initialization region, cancellation is deferred
    /// until the returned guard is dropped.
    pub fn enter_init(&self) -> InitRegion<'_> {
        let counted = {
            let state = relock(self.state.lock());
            self.is_worker(&state)
        };
        if counted {
            self.init_depth.fetch_add(1, Ordering::SeqCst);
        }
        InitRegion {
            tracer: self,
            generation: self.generation.load(Ordering::SeqCst),
            counted,
        }
    }

    /// Whether the worker is inside an irrevocable initialization region.
    pub fn in_init_region(&self) -> bool {
        self.init_depth.load(Ordering::SeqCst) != 0
    }

    /// Safe point of the instrumentation, unwinds the worker once the kill
    /// switch is set unless it is inside an initialization region.
    pub fn check_cancellation(&self) {
        if !self.kill_switch.load(Ordering::Relaxed) || self.in_init_region() {
            return;
        }
        let on_worker = {
            let state = relock(self.state.lock());
            self.is_worker(&state)
        };
        if on_worker {
            cancel();
        }
    }

    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Trace, &mut Observations) -> Result<(), TraceError>,
    {
        if !self.is_enabled() {
            return;
        }
        let mut state = relock(self.state.lock());
        if !self.is_worker(&state) {
            return;
        }
        let State {
            trace,
            observations,
            pending,
            ..
        } = &mut *state;
        if let Err(e) = f(trace, observations) {
            log::warn!("trace: {}", e);
            if pending.is_none() {
                *pending = Some(e);
            }
        }
    }

    pub fn on_branch(&self, branch: BranchId, predicate: Predicate) {
        if !self.is_enabled() {
            return;
        }
        self.check_cancellation();
        let d = predicate.distance();
        self.update(|t, _| {
            t.branch_passed(branch, d);
            Ok(())
        });
    }

    pub fn on_line(&self, class: &str, method: &str, line: u32) {
        if !self.is_enabled() {
            return;
        }
        self.check_cancellation();
        self.update(|t, _| {
            t.line_passed(class, method, line);
            Ok(())
        });
    }

    pub fn on_method_enter(&self, class: &str, method: &str, caller: Identity, branchless: bool) {
        self.update(|t, _| {
            t.entered_method(class, method, caller, branchless);
            Ok(())
        });
    }

    pub fn on_method_exit(&self, class: &str, method: &str) {
        self.update(|t, _| t.exit_method(class, method));
    }

    pub fn on_return_value(&self, class: &str, method: &str, value: i64) {
        self.update(|t, _| {
            t.return_value(class, method, value);
            Ok(())
        });
    }

    /// Returned object, identified by its textual rendering.
    pub fn on_return_object(&self, class: &str, method: &str, repr: &str) {
        self.on_return_value(class, method, hash_rendering(repr));
    }

    pub fn on_static_field_read(&self, class: &str, _field: &str) {
        self.update(|t, _| {
            t.static_field_read(class);
            Ok(())
        });
    }

    pub fn on_static_field_write(&self, class: &str, _field: &str) {
        self.update(|t, _| {
            t.static_field_written(class);
            Ok(())
        });
    }

    pub fn on_class_initialized(&self, class: &str) {
        self.update(|t, _| {
            t.class_initialized(class);
            Ok(())
        });
    }

    pub fn on_definition(&self, id: DefUseId, caller: Identity) {
        let table = self.def_use.as_deref();
        self.update(|t, _| {
            let site = table
                .and_then(|table| table.definition(id))
                .ok_or(TraceError::UnknownDefUse {
                    kind: "definition",
                    id,
                })?;
            t.definition_passed(&site.var, site.is_static, caller, id);
            Ok(())
        });
    }

    pub fn on_use(&self, id: DefUseId, caller: Identity) {
        let table = self.def_use.as_deref();
        self.update(|t, _| {
            let site = table
                .and_then(|table| table.use_site(id))
                .ok_or(TraceError::UnknownDefUse { kind: "use", id })?;
            t.use_passed(&site.var, site.is_static, caller, id);
            Ok(())
        });
    }

    /// The program under test raises `fault` on purpose.
    pub fn on_fault_raised(&self, fault: &Arc<Fault>) {
        self.update(|t, _| {
            t.set_explicit_fault(Arc::clone(fault));
            Ok(())
        });
    }

    pub fn on_mutant(&self, mutant: MutantId, infection_distance: f64) {
        self.update(|t, _| {
            t.mutation_passed(mutant, infection_distance);
            Ok(())
        });
    }

    pub fn on_resource_read(&self, resource: &str) {
        self.update(|_, o| {
            if !o.read_resources.contains(resource) {
                o.read_resources.insert(to_boxed_str(resource));
            }
            Ok(())
        });
    }

    pub fn on_resource_write(&self, _resource: &str) {
        self.update(|_, o| {
            o.resource_written = true;
            Ok(())
        });
    }
}

/// Guard of [`Tracer::suspend`].
pub struct Suspended<'a> {
    tracer: &'a Tracer,
    was_enabled: bool,
}

impl Drop for Suspended<'_> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.tracer.enable();
        }
    }
}

/// Guard of [`Tracer::enter_init`].
pub struct InitRegion<'a> {
    tracer: &'a Tracer,
    generation: u64,
    counted: bool,
}

impl Drop for InitRegion<'_> {
    fn drop(&mut self) {
        // a clear() in between already reset the depth.
        if self.counted && self.tracer.generation.load(Ordering::SeqCst) == self.generation {
            let _ = self
                .tracer
                .init_depth
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
        }
    }
}
