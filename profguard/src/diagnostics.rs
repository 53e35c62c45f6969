//! Human-readable status lines and fatal-error reporting
//!
//! Status lines go to stderr with a `profile:` prefix and are advisory only.
//! They are mirrored to the `log` facade at debug level so hosts that route
//! logs elsewhere still see them.

use log::{debug, error};
use std::fmt;

/// Print a status line unless the session is quiet
pub fn status(quiet: bool, message: fmt::Arguments<'_>) {
    debug!("profile: {message}");
    if !quiet {
        eprintln!("profile: {message}");
    }
}

/// Report an unrecoverable session error and terminate the process
///
/// Used for misuse and provisioning failures, where continuing would leave
/// instrumentation half-armed.
pub fn fatal(err: &dyn std::error::Error) -> ! {
    error!("profile: {err}");
    eprintln!("profile: {err}");
    std::process::exit(1)
}
