use super::*;
use crate::model::fault::PANIC_KIND;
use crate::model::{OpError, Type, Value, VarRef};
use crate::trace::Cmp;
use crate::trace::Predicate;
use crate::tracer::probe;
use std::sync::atomic::AtomicBool;

fn quick() -> ExecConf {
    ExecConf {
        timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_millis(50),
        ..ExecConf::default()
    }
}

fn spin() -> Result<(), OpError> {
    loop {
        probe::checkpoint();
        std::hint::spin_loop();
    }
}

#[test]
fn branch_distance_of_equality() {
    let mut exec = Executor::new(quick()).unwrap();
    let mut t = Test::new();
    t.push_fn("if (x == 0)", |_, _| {
        let x = 5;
        probe::branch(1, Predicate::Zero(Cmp::Eq, x));
        Ok(())
    });
    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert!(!ret.has_fault());
    assert_eq!(ret.executed_operations(), 1);
    assert_eq!(ret.trace().true_distance(1), Some(5.0));
    assert_eq!(ret.trace().false_distance(1), Some(0.0));
    assert_eq!(ret.trace().covered_false_branches().len(), 1);
    assert!(ret.trace().covered_true_branches().is_empty());
}

#[test]
fn stops_at_first_fault() {
    let mut exec = Executor::new(quick()).unwrap();
    let ran = Arc::new(AtomicBool::new(false));
    let mut t = Test::new();
    t.push_fn("a()", |_, _| Ok(()));
    t.push_fn("b()", |_, _| Ok(()));
    t.push_fn("c()", |_, _| Err(Fault::new("IllegalStateException", "c").into()));
    let r = Arc::clone(&ran);
    t.push_fn("d()", move |_, _| {
        r.store(true, Ordering::SeqCst);
        Ok(())
    });

    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert_eq!(ret.faults().len(), 1);
    assert_eq!(ret.first_fault_position(), Some(2));
    assert_eq!(ret.fault_at(2).unwrap().kind(), "IllegalStateException");
    assert_eq!(ret.executed_operations(), 3);
    assert!(!ret.is_explicit(2));
    assert!(!ret.has_timeout());
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(exec.stats().load(EXEC_FAULTS), 1);
}

#[test]
fn continue_after_fault() {
    let mut exec = Executor::new(ExecConf {
        break_on_fault: false,
        ..quick()
    })
    .unwrap();
    let mut t = Test::new();
    t.push_fn("a()", |_, _| Ok(()));
    t.push_fn("b()", |_, _| Err(Fault::new("E", "b").into()));
    t.push_fn("c()", |_, _| Err(Fault::new("E", "c").into()));
    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert_eq!(ret.executed_operations(), 3);
    assert_eq!(ret.faults().keys().copied().collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn panics_become_faults() {
    let mut exec = Executor::new(quick()).unwrap();
    let mut t = Test::new();
    t.push_fn("boom()", |_, _| panic!("boom"));
    let ret = exec.execute(&Arc::new(t)).unwrap();
    let f = ret.fault_at(0).unwrap();
    assert_eq!(f.kind(), PANIC_KIND);
    assert_eq!(f.message(), "boom");
    assert!(!ret.is_explicit(0));
}

#[test]
fn raised_fault_is_explicit() {
    let mut exec = Executor::new(quick()).unwrap();
    let mut t = Test::new();
    t.push_fn("read()", |_, _| {
        probe::resource_read("config.txt");
        Err(probe::raise(Fault::new("IOException", "closed")).into())
    });
    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert!(ret.is_explicit(0));
    assert_eq!(ret.read_resources().collect::<Vec<_>>(), vec!["config.txt"]);
    assert!(!ret.was_resource_written());
}

#[test]
fn mutant_keeps_minimum_distance() {
    let mut exec = Executor::new(quick()).unwrap();
    let mut t = Test::new();
    t.push_fn("m()", |_, _| {
        probe::mutant(7, 0.0);
        Ok(())
    });
    t.push_fn("m()", |_, _| {
        probe::mutant(7, 3.5);
        Ok(())
    });
    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert!(ret.trace().touched_mutants().contains(&7));
    assert_eq!(ret.trace().mutation_distance(7), Some(0.0));
}

#[test]
fn busy_operation_is_cancelled() {
    let mut exec = Executor::new(quick()).unwrap();
    let mut t = Test::new();
    t.push_fn("spin()", |_, _| spin());
    t.push_fn("never()", |_, _| Ok(()));
    let t = Arc::new(t);

    let start = Instant::now();
    let ret = exec.execute(&t).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(ret.has_timeout());
    assert!(ret.fault_at(t.len()).unwrap().is_timeout());
    assert_eq!(ret.executed_operations(), 1);
    assert_eq!(exec.stalled_workers(), 0);

    // cancelled through the kill switch, the worker is reused.
    let mut ok = Test::new();
    ok.push_fn("a()", |_, _| Ok(()));
    let ret = exec.execute(&Arc::new(ok)).unwrap();
    assert!(!ret.has_fault());
    assert_eq!(exec.stats().load(WORKER_SPAWNED), 1);
    assert_eq!(exec.stats().load(EXEC_TIMEOUTS), 1);
}

fn wait_for_interrupt() -> Result<(), OpError> {
    // ignores the kill switch, only the interrupt flag stops it.
    while !probe::interrupted() {
        std::hint::spin_loop();
    }
    Ok(())
}

#[test]
fn interrupted_operation_is_a_timeout() {
    let mut exec = Executor::new(quick()).unwrap();
    let mut t = Test::new();
    t.push_fn("poll()", |_, _| wait_for_interrupt());
    t.push_fn("never()", |_, _| Ok(()));
    let t = Arc::new(t);

    let ret = exec.execute(&t).unwrap();
    assert!(ret.has_timeout());
    assert!(ret.fault_at(t.len()).unwrap().is_timeout());
    assert_eq!(ret.executed_operations(), 1);
    assert_eq!(exec.stalled_workers(), 0);

    // the last operation returning by itself after the interrupt.
    let mut last = Test::new();
    last.push_fn("poll()", |_, _| wait_for_interrupt());
    let ret = exec.execute(&Arc::new(last)).unwrap();
    assert!(ret.has_timeout());
    assert_eq!(ret.faults().len(), 1);

    let mut ok = Test::new();
    ok.push_fn("a()", |_, _| Ok(()));
    assert!(!exec.execute(&Arc::new(ok)).unwrap().has_fault());
    assert_eq!(exec.stats().load(WORKER_SPAWNED), 1);
    assert_eq!(exec.stats().load(WORKER_STALLED), 0);
}

struct Formatting;

impl ExecutionObserver for Formatting {
    fn after_operation(&self, _event: &OperationEvent<'_>, _fault: Option<&Fault>) {
        probe::line("Foo", "toString", 1);
    }

    fn on_finished(&self, _summary: &RunSummary<'_>) {
        probe::line("Foo", "toString", 2);
    }
}

#[test]
fn observer_in_instrumented_code_after_interrupt() {
    let mut exec = Executor::new(quick()).unwrap();
    exec.add_observer(Arc::new(Formatting));
    let mut t = Test::new();
    t.push_fn("poll()", |_, _| wait_for_interrupt());
    let t = Arc::new(t);

    let ret = exec.execute(&t).unwrap();
    assert!(ret.has_timeout());
    assert!(ret.fault_at(t.len()).unwrap().is_timeout());
    // suspended while observers run.
    assert!(ret.trace().covered_lines("Foo").is_empty());
    assert_eq!(exec.stats().load(EXEC_INTERNAL_ERRORS), 0);
}

#[test]
fn late_completion_is_not_a_timeout() {
    let mut exec = Executor::new(ExecConf {
        timeout: Duration::from_millis(50),
        shutdown_timeout: Duration::from_millis(1000),
        ..ExecConf::default()
    })
    .unwrap();
    let mut t = Test::new();
    // no probes, finishes inside the first grace period.
    t.push_fn("sleep()", |_, _| {
        thread::sleep(Duration::from_millis(100));
        Ok(())
    });
    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert!(!ret.has_fault());
    assert_eq!(ret.executed_operations(), 1);
    assert_eq!(exec.stats().load(EXEC_TIMEOUTS), 0);
}

#[test]
fn cancelled_run_does_not_leak() {
    let mut exec = Executor::new(quick()).unwrap();
    let first = Arc::new(AtomicBool::new(true));
    let f = Arc::clone(&first);
    let mut t = Test::new();
    t.push_fn("maybe_hang()", move |_, _| {
        if f.swap(false, Ordering::SeqCst) {
            probe::branch(1, Predicate::Zero(Cmp::Eq, 0));
            return spin();
        }
        probe::branch(2, Predicate::Zero(Cmp::Eq, 1));
        Ok(())
    });
    let t = Arc::new(t);

    let ret = exec.execute(&t).unwrap();
    assert!(ret.has_timeout());
    assert!(ret.trace().covered_predicates().contains(&1));

    let ret = exec.execute(&t).unwrap();
    assert!(!ret.has_fault());
    let covered = ret.trace().covered_predicates();
    assert!(!covered.contains(&1));
    assert!(covered.contains(&2));
}

#[test]
fn unresponsive_worker_is_abandoned() {
    let mut exec = Executor::new(ExecConf {
        timeout: Duration::from_millis(50),
        shutdown_timeout: Duration::from_millis(30),
        ..ExecConf::default()
    })
    .unwrap();
    let mut t = Test::new();
    // no probes, nothing can stop it.
    t.push_fn("sleep()", |_, _| {
        thread::sleep(Duration::from_millis(500));
        Ok(())
    });
    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert!(ret.has_timeout());
    assert_eq!(exec.stalled_workers(), 1);
    assert_eq!(exec.stats().load(WORKER_STALLED), 1);

    let mut ok = Test::new();
    ok.push_fn("a()", |_, _| {
        probe::branch(3, Predicate::Zero(Cmp::Ne, 1));
        Ok(())
    });
    let ret = exec.execute(&Arc::new(ok)).unwrap();
    assert!(!ret.has_fault());
    assert!(ret.trace().covered_true_branches().contains(&3));
    assert_eq!(exec.stats().load(WORKER_SPAWNED), 2);

    let start = Instant::now();
    while exec.stalled_workers() != 0 {
        assert!(start.elapsed() < Duration::from_secs(5));
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn initialization_is_not_interrupted() {
    let mut exec = Executor::new(ExecConf {
        timeout: Duration::from_millis(30),
        shutdown_timeout: Duration::from_millis(20),
        init_patience: 20,
        ..ExecConf::default()
    })
    .unwrap();
    let initialized = Arc::new(AtomicBool::new(false));
    let done = Arc::clone(&initialized);
    let mut t = Test::new();
    t.push_fn("new Config()", move |_, _| {
        probe::initializing(|| {
            let start = Instant::now();
            while start.elapsed() < Duration::from_millis(120) {
                probe::line("Config", "<clinit>", 1);
            }
            probe::class_initialized("Config");
        });
        done.store(true, Ordering::SeqCst);
        spin()
    });
    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert!(initialized.load(Ordering::SeqCst));
    assert!(ret.has_timeout());
    assert!(exec.stats().load(WORKER_INIT_PATIENCE) > 0);
    assert_eq!(
        ret.trace().initialized_classes(),
        &[Box::<str>::from("Config")]
    );
}

#[cfg(target_os = "linux")]
#[test]
fn cpu_budget_ignores_sleep() {
    let mut exec = Executor::new(ExecConf {
        timeout: Duration::from_millis(50),
        cpu_timeout: true,
        ..ExecConf::default()
    })
    .unwrap();
    let mut t = Test::new();
    t.push_fn("sleep()", |_, _| {
        thread::sleep(Duration::from_millis(150));
        Ok(())
    });
    let ret = exec.execute(&Arc::new(t)).unwrap();
    assert!(!ret.has_timeout());
}

#[test]
fn internal_errors_abort() {
    let mut exec = Executor::new(quick()).unwrap();
    let mut t = Test::new();
    t.push_fn("a()", |_, _| Ok(()));
    t.push_fn("b()", |_, _| Err(OpError::Internal("broken".to_string())));
    let err = exec.execute(&Arc::new(t)).unwrap_err();
    assert!(matches!(err, ExecError::Internal { position: 1, .. }));

    let mut t = Test::new();
    t.push_fn("use(v0)", |scope, _| {
        scope.read(&VarRef::new(0, Type::Int))?;
        Ok(())
    });
    let err = exec.execute(&Arc::new(t)).unwrap_err();
    assert!(matches!(err, ExecError::Scope { position: 0, .. }));
    assert_eq!(exec.stats().load(EXEC_INTERNAL_ERRORS), 2);
}

#[test]
fn trace_errors_abort() {
    let mut exec = Executor::new(quick()).unwrap();
    let mut t = Test::new();
    t.push_fn("f()", |_, _| {
        // the first exit consumes the main frame.
        probe::exit("A", "f");
        probe::exit("A", "f");
        Ok(())
    });
    let err = exec.execute(&Arc::new(t)).unwrap_err();
    assert!(matches!(
        err,
        ExecError::Trace(TraceError::CallStackUnderflow { .. })
    ));
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ExecutionObserver for Recorder {
    fn before_operation(&self, event: &OperationEvent<'_>) {
        relock(self.events.lock()).push(format!("before {} {}", event.position, event.code));
    }

    fn after_operation(&self, event: &OperationEvent<'_>, fault: Option<&Fault>) {
        let v = event
            .scope
            .read(&VarRef::new(0, Type::Int))
            .ok()
            .and_then(Value::as_int);
        relock(self.events.lock()).push(format!(
            "after {} {:?} {:?}",
            event.position,
            v,
            fault.map(Fault::kind)
        ));
    }

    fn on_finished(&self, summary: &RunSummary<'_>) {
        relock(self.events.lock()).push(format!(
            "finished {}/{} {}",
            summary.executed,
            summary.test_len,
            summary.faults.len()
        ));
    }

    fn clear(&self) {
        relock(self.events.lock()).clear();
    }
}

#[test]
fn observers_see_every_step() {
    let mut exec = Executor::new(quick()).unwrap();
    let rec = Arc::new(Recorder::default());
    exec.add_observer(Arc::clone(&rec) as Arc<dyn ExecutionObserver>);
    let mut t = Test::new();
    t.push_fn("int v0 = 3", |scope, _| {
        scope.bind(&VarRef::new(0, Type::Int), Value::Int(3));
        Ok(())
    });
    t.push_fn("v0.fail()", |_, _| Err(Fault::new("E", "fail").into()));
    let t = Arc::new(t);

    exec.execute(&t).unwrap();
    let events = relock(rec.events.lock()).clone();
    assert_eq!(
        events,
        vec![
            "before 0 int v0 = 3",
            "after 0 Some(3) None",
            "before 1 v0.fail()",
            "after 1 Some(3) Some(\"E\")",
            "finished 2/2 1",
        ]
    );

    // cleared before the next run.
    exec.execute(&t).unwrap();
    assert_eq!(relock(rec.events.lock()).len(), 5);

    exec.clear_observers();
    exec.execute(&t).unwrap();
    assert_eq!(relock(rec.events.lock()).len(), 5);
}

struct Exploding;

impl ExecutionObserver for Exploding {
    fn after_operation(&self, _event: &OperationEvent<'_>, _fault: Option<&Fault>) {
        panic!("observer bug");
    }
}

#[test]
fn observer_panic_is_internal() {
    let mut exec = Executor::new(quick()).unwrap();
    exec.add_observer(Arc::new(Exploding));
    let mut t = Test::new();
    t.push_fn("a()", |_, _| Ok(()));
    let err = exec.execute(&Arc::new(t)).unwrap_err();
    assert!(matches!(err, ExecError::Internal { .. }));
}

#[test]
fn bad_config_is_rejected() {
    let conf = ExecConf {
        timeout: Duration::from_millis(0),
        ..ExecConf::default()
    };
    assert!(matches!(Executor::new(conf), Err(ExecError::Config(_))));
    let conf = ExecConf {
        cpu_timeout: true,
        cpu_wall_factor: 0,
        ..ExecConf::default()
    };
    assert!(conf.check().is_err());
}
