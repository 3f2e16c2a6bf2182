//! Fatal Invariant Reporting
//!
//! The value core has no recoverable-error path. A wrong tag handed to a typed
//! accessor, a refcount underflow, or a mutation of a shared block means the
//! heap can no longer be trusted, so every such condition funnels through
//! [`internal_error`], which logs and then panics.
//!
//! Recoverable conditions (short reads, out-of-range indexes, heterogeneous
//! comparisons) never come here; they are expressed as nil / false / 0 return
//! values by the operations themselves.
//!
//! # Usage
//!
//! ```ignore
//! ice_assert!(offset < size, "block_get: offset {} past size {}", offset, size);
//! ```

/// Report an internal invariant violation and stop.
///
/// Never returns. The message is emitted as a `tracing` error event first so
/// hosts with a subscriber installed see it even when panics are configured to
/// abort.
#[cold]
#[track_caller]
pub fn internal_error(msg: &str) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(
        file = location.file(),
        line = location.line(),
        "internal error: {}",
        msg
    );
    panic!("internal error: {}", msg);
}

/// Assert a core invariant, reporting through [`internal_error`] on failure.
///
/// Unlike `debug_assert!`, these checks stay on in release builds: they guard
/// the refcount and tag discipline that every unsafe block relies on.
#[macro_export]
macro_rules! ice_assert {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::error::internal_error(concat!("assertion failed: ", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::error::internal_error(&format!($($arg)+));
        }
    };
}
