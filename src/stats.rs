//! Counters of an executor.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use iota::iota;
use rustc_hash::FxHashMap;

iota! {
    pub const EXEC_TOTAL: u64 = iota;
            , EXEC_FAULTS               // runs with at least one fault of the program under test
            , EXEC_TIMEOUTS
            , EXEC_INTERNAL_ERRORS
            , EXEC_TIME_MS              // accumulated wall clock time of all runs
            , EXEC_OPERATIONS
            , WORKER_SPAWNED
            , WORKER_STALLED            // workers abandoned after forced cancellation
            , WORKER_INIT_PATIENCE      // deadline extensions for initialization regions

            , STATS_LEN // place holder.
}

lazy_static! {
    pub static ref STATS: FxHashMap<u64, &'static str> = {
        fxhashmap! {
            EXEC_TOTAL              => "exec total",
            EXEC_FAULTS             => "exec faults",
            EXEC_TIMEOUTS           => "exec timeouts",
            EXEC_INTERNAL_ERRORS    => "internal errors",
            EXEC_TIME_MS            => "exec time(ms)",
            EXEC_OPERATIONS         => "operations",
            WORKER_SPAWNED          => "workers spawned",
            WORKER_STALLED          => "workers stalled",
            WORKER_INIT_PATIENCE    => "init patience"
        }
    };
}

pub struct Stats {
    start_tm: Instant,
    stats: [AtomicU64; STATS_LEN as usize],
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            start_tm: Instant::now(),
            stats: Default::default(),
        }
    }

    pub fn inc(&self, stat: u64) -> u64 {
        self.stats[stat as usize].fetch_add(1, Ordering::Relaxed)
    }

    pub fn add(&self, stat: u64, n: u64) -> u64 {
        self.stats[stat as usize].fetch_add(n, Ordering::Relaxed)
    }

    pub fn load(&self, stat: u64) -> u64 {
        self.stats[stat as usize].load(Ordering::Relaxed)
    }

    pub fn store(&self, stat: u64, val: u64) {
        self.stats[stat as usize].store(val, Ordering::Relaxed);
    }

    pub fn add_time(&self, d: Duration) {
        self.add(EXEC_TIME_MS, d.as_millis() as u64);
    }

    pub fn uptime(&self) -> Duration {
        self.start_tm.elapsed()
    }

    /// Average runs per second since creation.
    pub fn exec_speed(&self) -> f64 {
        let secs = self.start_tm.elapsed().as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.load(EXEC_TOTAL) as f64 / secs
    }

    pub fn report(&self) -> String {
        let mut out = String::new();
        for stat in 0..STATS_LEN {
            let _ = writeln!(out, "{:<16}: {}", STATS[&stat], self.load(stat));
        }
        let _ = write!(out, "{:<16}: {:.2}/s", "exec speed", self.exec_speed());
        out
    }
}
