//! CPU profiling via the `pprof` sampler
//!
//! The sampler installs a `SIGPROF` interval timer and unwinds the
//! interrupted thread on every tick. Samples accumulate in memory and are
//! written to the profile file when the session releases.

use pprof::protos::Message;
use pprof::{ProfilerGuard, ProfilerGuardBuilder};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use super::ReleaseAction;
use crate::diagnostics::status;
use crate::domain::{ArmError, Mode, ReleaseError};

struct ArmedCpu {
    guard: ProfilerGuard<'static>,
    file: File,
    path: PathBuf,
}

/// Start CPU sampling at `frequency` Hz, directed at `file`
///
/// # Errors
/// Returns an error if the sampler cannot be started (for example because
/// another sampler is already running in this process)
pub(crate) fn arm(
    file: File,
    path: PathBuf,
    frequency: i32,
    quiet: bool,
) -> Result<ReleaseAction, ArmError> {
    let guard = ProfilerGuardBuilder::default().frequency(frequency).build().map_err(ArmError::Sampler)?;
    status(quiet, format_args!("cpu profiling enabled, {}", path.display()));

    let armed = Mutex::new(Some(ArmedCpu { guard, file, path }));
    Ok(Box::new(move || {
        let Some(armed) = armed.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Err(ReleaseError::AlreadyReleased(Mode::Cpu));
        };
        release(armed, quiet)
    }))
}

fn release(armed: ArmedCpu, quiet: bool) -> Result<(), ReleaseError> {
    let ArmedCpu { guard, mut file, path } = armed;

    let report = guard.report().build();
    // Dropping the guard stops the timer
    drop(guard);

    let profile = report
        .and_then(|report| report.pprof())
        .map_err(|source| ReleaseError::Report { mode: Mode::Cpu, source })?;

    file.write_all(&profile.encode_to_vec())
        .and_then(|()| file.sync_all())
        .map_err(|source| ReleaseError::Write { mode: Mode::Cpu, path: path.clone(), source })?;

    status(quiet, format_args!("cpu profiling disabled, {}", path.display()));
    Ok(())
}
