//! Session lifecycle
//!
//! A process runs at most one profiling session at a time. [`Builder::start`]
//! claims the process-wide active flag, resolves the configuration,
//! provisions the output directory, arms the selected mode and (unless
//! suppressed) installs the SIGINT hook. The returned [`Session`] has one
//! operation: [`Session::stop`].
//!
//! ```rust,ignore
//! let session = profguard::start([ProfileOption::CpuProfile]);
//! run_workload();
//! session.stop()?;
//! ```
//!
//! Failures during start are fatal: the process exits with status 1 and a
//! `profile:` diagnostic. A profiling session without a destination, or a
//! second session fighting over the same sampling globals, is worse than no
//! session at all.

mod shutdown_hook;

use log::{debug, error};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cli::ProfileFlags;
use crate::config::{self, ProfileOption, SessionConfig};
use crate::diagnostics::fatal;
use crate::domain::{ReleaseError, SessionError};
use crate::profiling::{self, ReleaseAction};
use crate::provision::provision_output_dir;

/// Set while a session is armed; cleared by the session's last release action
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Collects options and flags, then starts the session
#[derive(Debug, Default)]
pub struct Builder {
    options: Vec<ProfileOption>,
    flags: ProfileFlags,
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one option; options apply in the order they were added
    #[must_use]
    pub fn option(mut self, option: ProfileOption) -> Self {
        self.options.push(option);
        self
    }

    /// Append several options in order
    #[must_use]
    pub fn options<I>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = ProfileOption>,
    {
        self.options.extend(options);
        self
    }

    /// Command-line flags; these override every option
    #[must_use]
    pub fn flags(mut self, flags: ProfileFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Start the process-wide profiling session
    ///
    /// Exits the process if a session is already active, or if the output
    /// directory or profile file cannot be created.
    pub fn start(self) -> Session {
        if ACTIVE.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            fatal(&SessionError::AlreadyActive);
        }

        let config = config::resolve(self.options, &self.flags);
        debug!("Resolved session config: {config:?}");

        let output_dir = provision_output_dir(config.output_path.as_deref())
            .unwrap_or_else(|err| fatal(&SessionError::from(err)));

        let mut releasers: Vec<ReleaseAction> = Vec::with_capacity(2);
        match profiling::arm(&config, &output_dir) {
            Ok(Some(release)) => releasers.push(release),
            Ok(None) => {}
            Err(err) => fatal(&SessionError::from(err)),
        }
        releasers.push(clear_active());

        let inner = Arc::new(SessionInner { config, output_dir, releasers: Mutex::new(releasers) });
        if !inner.config.no_shutdown_hook {
            shutdown_hook::install(Arc::clone(&inner));
        }
        Session { inner }
    }
}

/// Release action that lets the next `start` proceed
fn clear_active() -> ReleaseAction {
    Box::new(|| {
        ACTIVE.store(false, Ordering::Release);
        debug!("Profiling session released");
        Ok(())
    })
}

/// Start a session from options alone (no command-line flags)
pub fn start<I>(options: I) -> Session
where
    I: IntoIterator<Item = ProfileOption>,
{
    Builder::new().options(options).start()
}

/// Handle to the running session
#[must_use = "dropping the session without calling stop() loses the profile"]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Stop profiling and flush the profile file
    ///
    /// Runs every release action in registration order. A failing action is
    /// logged and does not prevent the remaining ones (including clearing
    /// the active flag) from running; the first failure is returned.
    ///
    /// The SIGINT hook holds its own reference to the session: an interrupt
    /// arriving after `stop` runs the release actions again. Programs that
    /// keep running after `stop` should use `ProfileOption::NoShutdownHook`.
    ///
    /// # Errors
    /// Returns the first error reported while flushing or closing the profile
    pub fn stop(self) -> Result<(), ReleaseError> {
        self.inner.stop()
    }
}

struct SessionInner {
    config: SessionConfig,
    output_dir: PathBuf,
    releasers: Mutex<Vec<ReleaseAction>>,
}

impl SessionInner {
    fn stop(&self) -> Result<(), ReleaseError> {
        debug!(
            "Stopping {} session in {}",
            self.config.mode.map_or("idle", |mode| mode.label()),
            self.output_dir.display()
        );

        let releasers = self.releasers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut first_error = None;
        for release in releasers.iter() {
            if let Err(err) = release() {
                error!("profile: {err}");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
