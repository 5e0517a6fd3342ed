use std::cell::Cell;
use std::sync::{LockResult, MutexGuard, PoisonError};

pub mod log;

macro_rules! fxhashmap {
    ($($key:expr => $value:expr,)+) => { fxhashmap!($($key => $value),+) };
    ($($key:expr => $value:expr),*) => {
        {
            let mut _map = ::rustc_hash::FxHashMap::default();
            $(
                let _ = _map.insert($key, $value);
            )*
            _map.shrink_to_fit();
            _map
        }
    };
}

thread_local! {
    static WORKER_ID: Cell<u64> = Cell::new(0);
}

#[inline]
pub fn set_worker_id(id: u64) {
    WORKER_ID.with(|r| r.set(id));
}

#[inline]
pub fn worker_id() -> u64 {
    WORKER_ID.with(|r| r.get())
}

#[macro_export]
macro_rules! worker_debug {
    ($t: tt, $($arg:tt)*) => (
        log::debug!(std::concat!("worker-{}: ", $t), $crate::utils::worker_id(), $($arg)*)
    )
}

#[macro_export]
macro_rules! worker_warn {
    ($t: tt, $($arg:tt)*) => (
        log::warn!(std::concat!("worker-{}: ", $t), $crate::utils::worker_id(), $($arg)*)
    )
}

pub(crate) fn to_boxed_str<T: AsRef<str>>(s: T) -> Box<str> {
    let t = s.as_ref();
    String::into_boxed_str(t.to_string())
}

/// Take the guard even if another thread panicked while holding the lock.
///
/// Operations of the program under test may unwind through code that holds
/// one of our locks, the protected data is still consistent in that case.
pub(crate) fn relock<T>(r: LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    r.unwrap_or_else(PoisonError::into_inner)
}
