//! SIGINT hook that flushes the session before the process dies
//!
//! Without it an interrupted process loses everything the samplers buffered.
//! The hook is fire-once: it stops the session and exits with status 0, so
//! no second signal is ever handled.

use log::warn;
use std::io;
use std::sync::Arc;
use std::thread;
use tokio::runtime::{Builder, Runtime};

use super::SessionInner;
use crate::diagnostics::status;

const THREAD_NAME: &str = "profguard-signal";

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Interrupt subscription, registered before the listener thread starts
///
/// Registering on the caller's thread means an interrupt delivered any time
/// after `start` returns is caught, even if the listener thread has not been
/// scheduled yet.
///
/// `start` may be called from inside an async runtime, where dropping a
/// runtime panics; the owned runtime is therefore always shut down in the
/// background.
struct Listener {
    runtime: Option<Runtime>,
    #[cfg(unix)]
    signal: Signal,
}

impl Listener {
    #[cfg(unix)]
    fn register(kind: SignalKind) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;

        let registered = {
            let _context = runtime.enter();
            signal(kind)
        };
        match registered {
            Ok(signal) => Ok(Self { runtime: Some(runtime), signal }),
            Err(e) => {
                runtime.shutdown_background();
                Err(e)
            }
        }
    }

    #[cfg(not(unix))]
    fn register() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime: Some(runtime) })
    }

    /// Block until the first interrupt arrives
    #[cfg(unix)]
    fn wait(mut self) {
        if let Some(runtime) = self.runtime.as_ref() {
            runtime.block_on(self.signal.recv());
        }
    }

    #[cfg(not(unix))]
    fn wait(self) {
        if let Some(runtime) = self.runtime.as_ref() {
            if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
                warn!("profile: interrupt listener failed: {e}");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Spawn the listener thread for `session`
///
/// Failure to install the hook is not fatal; the session keeps running and
/// the caller's own `stop` still flushes the profile.
pub(super) fn install(session: Arc<SessionInner>) {
    #[cfg(unix)]
    let registered = Listener::register(SignalKind::interrupt());
    #[cfg(not(unix))]
    let registered = Listener::register();

    let listener = match registered {
        Ok(listener) => listener,
        Err(e) => {
            warn!("profile: could not install shutdown hook: {e}");
            return;
        }
    };

    let spawned = thread::Builder::new().name(THREAD_NAME.to_string()).spawn(move || {
        listener.wait();

        status(false, format_args!("caught interrupt, stopping profiles"));
        // Release failures are already logged by stop()
        let _ = session.stop();

        std::process::exit(0);
    });

    if let Err(e) = spawned {
        warn!("profile: could not spawn {THREAD_NAME} thread: {e}");
    }
}
