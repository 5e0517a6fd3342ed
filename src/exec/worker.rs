//! Dedicated worker threads and bookkeeping of abandoned ones.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use super::timeout::CpuClock;
use crate::utils::{relock, set_worker_id};

/// Name prefix of worker threads.
pub const WORKER_THREAD_PREFIX: &str = "exec-worker-";

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Clears the alive flag when the worker thread ends, unwinding or not.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Thread running one job at a time.
pub(crate) struct Worker {
    id: u64,
    sender: Sender<Job>,
    handle: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    cpu_clock: Option<CpuClock>,
}

impl Worker {
    pub fn spawn(id: u64) -> io::Result<Self> {
        let (sender, jobs) = channel::<Job>();
        let (clock_tx, clock_rx) = sync_channel(1);
        let alive = Arc::new(AtomicBool::new(true));
        let guard = AliveGuard(Arc::clone(&alive));
        let handle = thread::Builder::new()
            .name(format!("{}{}", WORKER_THREAD_PREFIX, id))
            .spawn(move || {
                let _guard = guard;
                set_worker_id(id);
                let _ = clock_tx.send(CpuClock::current());
                for job in jobs.iter() {
                    job();
                }
                log::debug!("worker-{}: job channel closed", id);
            })?;
        let cpu_clock = clock_rx.recv().ok().flatten();
        log::debug!("worker-{} spawned, cpu clock: {}", id, cpu_clock.is_some());
        Ok(Self {
            id,
            sender,
            handle,
            alive,
            cpu_clock,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    pub fn cpu_clock(&self) -> Option<CpuClock> {
        self.cpu_clock
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Queue a job, gives it back if the thread is gone.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        self.sender.send(job).map_err(|e| e.0)
    }
}

struct Stalled {
    id: u64,
    since: Instant,
    alive: Arc<AtomicBool>,
    // detached on drop.
    _handle: JoinHandle<()>,
}

/// Workers that did not stop after forced cancellation.
///
/// They are never reused, entries are only kept for diagnostics.
#[derive(Default)]
pub struct StalledWorkers {
    inner: Mutex<Vec<Stalled>>,
}

impl StalledWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, worker: Worker) {
        let Worker {
            id, handle, alive, ..
        } = worker;
        relock(self.inner.lock()).push(Stalled {
            id,
            since: Instant::now(),
            alive,
            _handle: handle,
        });
    }

    /// Number of stalled workers still running, finished ones are pruned.
    pub fn count(&self) -> usize {
        let mut inner = relock(self.inner.lock());
        inner.retain(|s| {
            let alive = s.alive.load(Ordering::SeqCst);
            if !alive {
                log::debug!("stalled worker-{} finished after {:?}", s.id, s.since.elapsed());
            }
            alive
        });
        inner.len()
    }

    /// Ids and stall durations of the workers still running.
    pub fn stalled(&self) -> Vec<(u64, Duration)> {
        relock(self.inner.lock())
            .iter()
            .filter(|s| s.alive.load(Ordering::SeqCst))
            .map(|s| (s.id, s.since.elapsed()))
            .collect()
    }
}
