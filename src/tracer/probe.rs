//! Probes called by instrumented code.
//!
//! The harness binds its tracer to the worker thread for the duration of a
//! run, probes on any other thread are no-ops. Probes also honor a forced
//! interruption of the run they belong to, even after the harness moved on
//! and left the thread behind.

use std::cell::RefCell;
use std::sync::Arc;

use super::{cancel, RunControl, Tracer};
use crate::model::Fault;
use crate::trace::call::BranchId;
use crate::trace::defuse::DefUseId;
use crate::trace::distance::Identity;
use crate::trace::{MutantId, Predicate};

struct Binding {
    tracer: Arc<Tracer>,
    control: Arc<RunControl>,
}

thread_local! {
    static BINDING: RefCell<Option<Binding>> = RefCell::new(None);
}

/// Unbinds the tracer of the current thread on drop.
pub struct BindGuard {
    _priv: (),
}

impl Drop for BindGuard {
    fn drop(&mut self) {
        let _ = BINDING.try_with(|b| b.borrow_mut().take());
    }
}

/// Bind `tracer` to the current thread.
pub fn bind(tracer: Arc<Tracer>, control: Arc<RunControl>) -> BindGuard {
    BINDING.with(|b| *b.borrow_mut() = Some(Binding { tracer, control }));
    BindGuard { _priv: () }
}

/// Tracer bound to the current thread.
pub fn tracer() -> Option<Arc<Tracer>> {
    BINDING.with(|b| b.borrow().as_ref().map(|b| Arc::clone(&b.tracer)))
}

#[inline]
fn with<F: FnOnce(&Tracer)>(f: F) {
    let (tracer, interrupted) = match BINDING.with(|b| {
        b.borrow()
            .as_ref()
            .map(|b| (Arc::clone(&b.tracer), b.control.is_interrupted()))
    }) {
        Some(bound) => bound,
        None => return,
    };
    if interrupted {
        cancel();
    }
    f(&tracer)
}

/// Whether the run of the current thread was asked to stop.
///
/// Operations that block or loop without reaching other probes poll this.
pub fn interrupted() -> bool {
    BINDING.with(|b| {
        b.borrow()
            .as_ref()
            .map_or(false, |b| b.control.is_interrupted())
    })
}

/// Safe point without any other event.
pub fn checkpoint() {
    with(|t| t.check_cancellation())
}

pub fn branch(id: BranchId, predicate: Predicate) {
    with(|t| t.on_branch(id, predicate))
}

pub fn line(class: &str, method: &str, line: u32) {
    with(|t| t.on_line(class, method, line))
}

pub fn enter(class: &str, method: &str, caller: Identity, branchless: bool) {
    with(|t| t.on_method_enter(class, method, caller, branchless))
}

pub fn exit(class: &str, method: &str) {
    if let Some(t) = tracer() {
        t.on_method_exit(class, method)
    }
}

/// Report entry of a method, the exit is reported when the guard drops.
pub fn method<'a>(class: &'a str, method: &'a str, caller: Identity) -> MethodFrame<'a> {
    enter(class, method, caller, false);
    MethodFrame { class, method }
}

/// Guard of [`method`].
pub struct MethodFrame<'a> {
    class: &'a str,
    method: &'a str,
}

impl Drop for MethodFrame<'_> {
    fn drop(&mut self) {
        exit(self.class, self.method)
    }
}

pub fn return_value(class: &str, method: &str, value: i64) {
    with(|t| t.on_return_value(class, method, value))
}

pub fn return_object(class: &str, method: &str, repr: &str) {
    with(|t| t.on_return_object(class, method, repr))
}

pub fn static_read(class: &str, field: &str) {
    with(|t| t.on_static_field_read(class, field))
}

pub fn static_write(class: &str, field: &str) {
    with(|t| t.on_static_field_write(class, field))
}

pub fn class_initialized(class: &str) {
    with(|t| t.on_class_initialized(class))
}

pub fn definition(id: DefUseId, caller: Identity) {
    with(|t| t.on_definition(id, caller))
}

pub fn use_site(id: DefUseId, caller: Identity) {
    with(|t| t.on_use(id, caller))
}

/// Report `fault` as raised on purpose and hand it back.
pub fn raise(fault: Fault) -> Arc<Fault> {
    let fault = Arc::new(fault);
    with(|t| t.on_fault_raised(&fault));
    fault
}

pub fn mutant(id: MutantId, infection_distance: f64) {
    with(|t| t.on_mutant(id, infection_distance))
}

pub fn resource_read(resource: &str) {
    with(|t| t.on_resource_read(resource))
}

pub fn resource_write(resource: &str) {
    with(|t| t.on_resource_write(resource))
}

/// Run `f` as irrevocable initialization, cancellation waits until it returns.
pub fn initializing<R, F: FnOnce() -> R>(f: F) -> R {
    match tracer() {
        Some(t) => {
            let _region = t.enter_init();
            f()
        }
        None => f(),
    }
}
