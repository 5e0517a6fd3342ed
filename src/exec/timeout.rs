//! Deadline enforcement for the worker.
//!
//! The harness waits on the worker's result channel. In cpu time mode an
//! expired wait is re-armed as long as the worker consumed less cpu time
//! than the budget, a worker that was merely descheduled is given more time.
//! A wall clock ceiling bounds the total wait in either mode.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
use nix::time::{clock_gettime, ClockId};

/// Shortest re-armed wait.
const MIN_REARM: Duration = Duration::from_millis(10);

/// Cpu time clock of one thread.
#[derive(Debug, Clone, Copy)]
pub struct CpuClock {
    #[cfg(target_os = "linux")]
    id: ClockId,
}

impl CpuClock {
    /// Clock of the calling thread, `None` if the platform has none.
    #[cfg(target_os = "linux")]
    pub fn current() -> Option<Self> {
        let mut clk: nix::libc::clockid_t = 0;
        // SAFETY: pthread_self is always valid for the calling thread and clk outlives the call.
        let ret = unsafe { nix::libc::pthread_getcpuclockid(nix::libc::pthread_self(), &mut clk) };
        if ret != 0 {
            return None;
        }
        Some(Self {
            id: ClockId::from_raw(clk),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn current() -> Option<Self> {
        None
    }

    /// Cpu time consumed so far, `None` once the thread is gone.
    #[cfg(target_os = "linux")]
    pub fn elapsed(&self) -> Option<Duration> {
        let ts = clock_gettime(self.id).ok()?;
        Some(Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn elapsed(&self) -> Option<Duration> {
        None
    }
}

/// Time budget of one execution.
#[derive(Debug)]
pub struct Deadline {
    budget: Duration,
    started: Instant,
    ceiling: Duration,
    /// Worker clock and its reading at the start.
    cpu: Option<(CpuClock, Duration)>,
}

impl Deadline {
    pub fn wall(budget: Duration) -> Self {
        Self {
            budget,
            started: Instant::now(),
            ceiling: budget,
            cpu: None,
        }
    }

    /// Cpu time budget of the thread owning `clock`, falls back to wall clock
    /// if the clock can not be read.
    pub fn cpu(budget: Duration, clock: Option<CpuClock>, wall_factor: u32) -> Self {
        let cpu = clock.and_then(|c| c.elapsed().map(|start| (c, start)));
        let ceiling = if cpu.is_some() {
            budget * wall_factor.max(1)
        } else {
            budget
        };
        Self {
            budget,
            started: Instant::now(),
            ceiling,
            cpu,
        }
    }

    pub fn is_cpu(&self) -> bool {
        self.cpu.is_some()
    }

    /// How long to wait before the next check, `None` once expired.
    pub fn next_wait(&self) -> Option<Duration> {
        let wall = self.started.elapsed();
        let left = self.ceiling.checked_sub(wall).filter(|d| !d.is_zero())?;
        match self.cpu {
            None => Some(left),
            Some((clock, start)) => {
                let used = match clock.elapsed() {
                    Some(now) => now.checked_sub(start).unwrap_or_default(),
                    None => return None,
                };
                let rest = self.budget.checked_sub(used).filter(|d| !d.is_zero())?;
                Some(rest.max(MIN_REARM).min(left))
            }
        }
    }
}

/// Outcome of waiting on the worker.
#[derive(Debug)]
pub enum Waited<T> {
    Done(T),
    Expired,
    /// Worker dropped its end without answering.
    Lost,
}

/// Wait until the worker answers or the deadline expires.
pub fn wait<T>(rx: &Receiver<T>, deadline: &Deadline) -> Waited<T> {
    loop {
        let d = match deadline.next_wait() {
            Some(d) => d,
            None => return Waited::Expired,
        };
        match rx.recv_timeout(d) {
            Ok(v) => return Waited::Done(v),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Waited::Lost,
        }
    }
}

/// Wait at most `d` for the worker.
pub fn wait_for<T>(rx: &Receiver<T>, d: Duration) -> Waited<T> {
    match rx.recv_timeout(d) {
        Ok(v) => Waited::Done(v),
        Err(RecvTimeoutError::Timeout) => Waited::Expired,
        Err(RecvTimeoutError::Disconnected) => Waited::Lost,
    }
}
