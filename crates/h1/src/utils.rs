//! Utility macros and functions for the crate.
//!
//! This module provides helpers that are used internally by the parser,
//! the inbound queue and the frame.

use std::fmt::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
///
/// # Example
///
/// ```ignore
/// ensure!(count <= limits.max_request_header_count, BadRequest::too_many_headers());
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// The guarded data in this crate stays consistent across panics (flags and
/// lists only), so poisoning carries no information worth propagating.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Renders bytes for log and error messages.
///
/// Printable ASCII is kept as-is, everything else becomes `<0xNN>`.
pub(crate) fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) {
            out.push(b as char);
        } else {
            let _ = write!(out, "<0x{b:02X}>");
        }
    }
    out
}
