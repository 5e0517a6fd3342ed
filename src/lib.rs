//! Execution and feedback core of a search-based test generator.
//!
//! Tests are replayed on a dedicated worker thread under a deadline while
//! the instrumented program under test reports control flow, data flow and
//! mutation events to a [`Tracer`](tracer::Tracer). Each run produces an
//! [`ExecutionResult`](exec::ExecutionResult) carrying the faults raised and
//! the collected [`Trace`](trace::Trace).

#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod utils;
pub mod exec;
pub mod model;
pub mod stats;
pub mod trace;
pub mod tracer;

pub use exec::{ExecConf, ExecError, ExecutionObserver, ExecutionResult, Executor};
pub use model::{Fault, Operation, Scope, Test};
pub use trace::{Trace, TraceConf};
pub use tracer::Tracer;
