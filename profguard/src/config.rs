//! Session configuration resolution
//!
//! Programmatic options are applied in call order, then command-line flags
//! override them. The result is an immutable [`SessionConfig`] produced
//! before any I/O happens.

use std::path::PathBuf;

use crate::cli::ProfileFlags;
use crate::domain::Mode;

/// Heap sampling rate used when no rate is configured
///
/// One allocation is recorded per this many allocated bytes.
pub const DEFAULT_MEMORY_RATE: usize = 4096;

/// CPU sampling frequency in Hz
pub const DEFAULT_CPU_FREQUENCY: i32 = 100;

/// A single configuration edit, applied in the order given to the builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileOption {
    /// Suppress status lines
    Quiet,
    /// Do not hook SIGINT; the caller promises to call `stop` during shutdown
    NoShutdownHook,
    /// Select CPU profiling, replacing any earlier mode
    CpuProfile,
    /// Sampling frequency for CPU profiling (does not select a mode)
    CpuFrequency(i32),
    /// Select memory profiling, replacing any earlier mode
    MemProfile,
    /// Select memory profiling with the given rate
    MemProfileRate(usize),
    /// Select block (contention) profiling, replacing any earlier mode
    BlockProfile,
    /// Directory for the profile file; empty means allocate a temp dir
    ProfilePath(PathBuf),
}

/// Fully resolved, immutable session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub mode: Option<Mode>,
    /// `None` means allocate a fresh temporary directory
    pub output_path: Option<PathBuf>,
    pub quiet: bool,
    pub no_shutdown_hook: bool,
    pub memory_rate: usize,
    pub cpu_frequency: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: None,
            output_path: None,
            quiet: false,
            no_shutdown_hook: false,
            memory_rate: DEFAULT_MEMORY_RATE,
            cpu_frequency: DEFAULT_CPU_FREQUENCY,
        }
    }
}

impl SessionConfig {
    fn apply(&mut self, option: ProfileOption) {
        match option {
            ProfileOption::Quiet => self.quiet = true,
            ProfileOption::NoShutdownHook => self.no_shutdown_hook = true,
            ProfileOption::CpuProfile => self.mode = Some(Mode::Cpu),
            ProfileOption::CpuFrequency(hz) => self.cpu_frequency = hz,
            ProfileOption::MemProfile => self.mode = Some(Mode::Memory),
            ProfileOption::MemProfileRate(rate) => {
                self.memory_rate = rate;
                self.mode = Some(Mode::Memory);
            }
            ProfileOption::BlockProfile => self.mode = Some(Mode::Block),
            ProfileOption::ProfilePath(path) => {
                self.output_path = if path.as_os_str().is_empty() { None } else { Some(path) };
            }
        }
    }

    fn apply_flags(&mut self, flags: &ProfileFlags) {
        // CPU wins when several mode flags are given
        if flags.cpu {
            self.mode = Some(Mode::Cpu);
        } else if flags.mem {
            self.mode = Some(Mode::Memory);
        } else if flags.block {
            self.mode = Some(Mode::Block);
        }

        if flags.mem_rate != 0 {
            self.memory_rate = flags.mem_rate;
            self.mode = Some(Mode::Memory);
        }

        if let Some(dir) = flags.output_dir.as_ref().filter(|d| !d.as_os_str().is_empty()) {
            self.output_path = Some(dir.clone());
        }
    }
}

/// Merge options (in order) and flag overrides into one configuration
pub fn resolve<I>(options: I, flags: &ProfileFlags) -> SessionConfig
where
    I: IntoIterator<Item = ProfileOption>,
{
    let mut config = SessionConfig::default();
    for option in options {
        config.apply(option);
    }
    config.apply_flags(flags);
    config
}
