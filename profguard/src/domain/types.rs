//! Domain types providing compile-time safety and self-documentation

use std::fmt;

/// Profile file written for CPU sessions
pub const CPU_PROFILE_FILE: &str = "cpu.pprof";

/// Profile file written for memory sessions
pub const MEM_PROFILE_FILE: &str = "mem.pprof";

/// Profile file written for block (contention) sessions
pub const BLOCK_PROFILE_FILE: &str = "block.pprof";

/// Which kind of runtime behavior a session measures
///
/// At most one mode is armed per session. A resolved configuration holds
/// `Option<Mode>`; `None` means the session profiles nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// CPU time, sampled by a profiling timer
    Cpu,
    /// Heap allocations, sampled by the global allocator wrapper
    Memory,
    /// Time spent blocked on contended primitives
    Block,
}

impl Mode {
    /// Name of the profile file this mode writes into the output directory
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Mode::Cpu => CPU_PROFILE_FILE,
            Mode::Memory => MEM_PROFILE_FILE,
            Mode::Block => BLOCK_PROFILE_FILE,
        }
    }

    /// Short lowercase label used in status lines
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Mode::Cpu => "cpu",
            Mode::Memory => "memory",
            Mode::Block => "block",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
