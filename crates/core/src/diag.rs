//! Plain stderr diagnostics, separate from the structured `tracing` pipeline.
//!
//! These lines are a documented external contract (see the end-to-end
//! scenarios that grep stdout/stderr for exact substrings), so they are
//! written directly rather than through a formatter that might reflow them.

use std::fmt;

pub fn log(args: fmt::Arguments<'_>) {
  eprintln!("sleepingd: {args}");
}

pub fn log_error(err: impl fmt::Display) {
  eprintln!("sleepingd: error: {err}");
}

/// Print a fatal diagnostic and exit the process with status 1.
///
/// Mirrors the original implementation's `Must`: used on the handful of
/// startup and lifecycle paths where continuing would violate an invariant
/// the rest of the system depends on (see the coordinator's activity and
/// expiry handlers). Takes `Display` rather than `Error` so it reads equally
/// well for `thiserror` enums and `anyhow::Error`.
pub fn must(err: impl fmt::Display) -> ! {
  eprintln!("sleepingd: fatal: {err}");
  std::process::exit(1)
}

#[macro_export]
macro_rules! diag_log {
  ($($arg:tt)*) => {
    $crate::diag::log(format_args!($($arg)*))
  };
}
