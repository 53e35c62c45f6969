//! Mode activation
//!
//! Arming a mode creates its profile file and mutates the process-wide
//! instrumentation state for that mode. The returned [`ReleaseAction`]
//! reverses exactly that mutation and flushes the captured data:
//!
//! ```text
//!   Idle ──arm()──▶ Armed(mode) ──release()──▶ Released
//! ```
//!
//! - [`cpu`]: timer-driven CPU sampling (`pprof`)
//! - [`heap`]: allocation sampling through [`heap::SampledAlloc`]
//! - [`contention`]: blocking events from instrumented primitives

pub mod contention;
pub mod cpu;
pub mod heap;

use log::debug;
use std::fs::File;
use std::path::Path;

use crate::config::SessionConfig;
use crate::domain::{ArmError, Mode, ReleaseError};

/// Cleanup step registered by a session, run in registration order by `stop`
///
/// Each action undoes one piece of arming. Running an action a second time
/// does not repeat the flush; mode actions report
/// [`ReleaseError::AlreadyReleased`] instead.
pub type ReleaseAction = Box<dyn Fn() -> Result<(), ReleaseError> + Send + Sync>;

/// Arm the configured mode inside `output_dir`
///
/// Returns `None` when no mode is configured: nothing is armed and no file is
/// produced. The profile file is created before any global state changes, so
/// a failed arm leaves the process untouched.
///
/// # Errors
/// Returns an error if the profile file cannot be created or the sampler
/// cannot start
pub fn arm(config: &SessionConfig, output_dir: &Path) -> Result<Option<ReleaseAction>, ArmError> {
    let Some(mode) = config.mode else {
        debug!("No profiling mode selected, nothing to arm");
        return Ok(None);
    };

    let path = output_dir.join(mode.file_name());
    let file = File::create(&path)
        .map_err(|source| ArmError::CreateFile { mode, path: path.clone(), source })?;
    debug!("Arming {mode} profiling into {}", path.display());

    let release = match mode {
        Mode::Cpu => cpu::arm(file, path, config.cpu_frequency, config.quiet)?,
        Mode::Memory => heap::arm(file, path, config.memory_rate, config.quiet),
        Mode::Block => contention::arm(file, path, config.quiet),
    };
    Ok(Some(release))
}

/// Serializes unit tests that touch the process-wide sampling rates
#[cfg(test)]
pub(crate) static GLOBALS_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn lock_globals() -> std::sync::MutexGuard<'static, ()> {
    GLOBALS_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
