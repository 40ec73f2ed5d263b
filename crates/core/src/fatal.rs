//! Fatal-error tier
//!
//! Internal-consistency violations (a yield marker no frame claimed, integer
//! overflow with no big-integer collaborator, allocation failure) signal a
//! broken invariant in a caller, not a recoverable condition. They print one
//! diagnostic and abort the process; aborting rather than exiting keeps the
//! core dump for the debugger. Recoverable source-level failure never comes
//! through here; it travels as data through the final-yield path.

use std::fmt;
use std::io::Write;

/// Print a formatted diagnostic with its status code to stderr, then abort.
///
/// Prefer the [`fatal_error!`](crate::fatal_error) macro at call sites.
pub fn fatal_error_fmt(status: i32, args: fmt::Arguments<'_>) -> ! {
    // Build the line first so it lands in one write even if stderr is shared.
    let mut line = format!("tern: fatal error ({}): {}", status, args);
    line.push('\n');
    let _ = std::io::stderr().write_all(line.as_bytes());
    unsafe { libc::abort() }
}

/// Abort the process over an internal-consistency violation.
///
/// `fatal_error!(status, "fmt", args...)`; `status` is a libc errno-style
/// code carried into the diagnostic.
#[macro_export]
macro_rules! fatal_error {
    ($status:expr, $($arg:tt)*) => {
        $crate::fatal::fatal_error_fmt($status, ::core::format_args!($($arg)*))
    };
}
