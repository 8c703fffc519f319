use std::sync::{Mutex, MutexGuard, PoisonError};

/// Sign-extends the low `$bits` bits of `$val` into an `i32`.
#[macro_export]
macro_rules! sign_extend {
    ($val:expr, $bits:expr) => {
        ((($val as u32) << (32 - $bits)) as i32 >> (32 - $bits))
    };
}

/// Keeps the low `$bits` bits of `$val` as a `u32`.
#[macro_export]
macro_rules! zero_extend {
    ($val:expr, $bits:expr) => {
        (($val as u32) & ((1u64 << $bits) - 1) as u32)
    };
}

#[macro_export]
macro_rules! round_up {
    ($val:expr, $align:expr) => {
        (($val as u32 + $align as u32 - 1) & !($align as u32 - 1))
    };
}

#[macro_export]
macro_rules! round_down {
    ($val:expr, $align:expr) => {
        ($val as u32 & !($align as u32 - 1))
    };
}

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
