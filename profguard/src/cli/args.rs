//! CLI argument definitions for the `profguard` binary

use clap::{Parser, ValueEnum};

use super::flags::ProfileFlags;

/// Built-in workloads the binary can run under a session
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// Spin on arithmetic (exercises CPU sampling)
    Cpu,
    /// Churn through heap allocations (exercises heap sampling)
    Alloc,
    /// Fight over a shared lock from several threads (exercises contention)
    Contend,
    /// Sleep without doing work
    Idle,
}

#[derive(Parser)]
#[command(
    name = "profguard",
    about = "Run a workload under a single profiling session",
    after_help = "\
EXAMPLES:
    profguard --workload cpu --cpuprofile                 CPU profile into a temp dir
    profguard --workload alloc --memprofilerate 1         Sample every allocation
    profguard --workload contend --blockprofile --outputdir ./prof"
)]
pub struct Args {
    /// Workload to run while profiling
    #[arg(short, long, value_enum, default_value = "cpu")]
    pub workload: Workload,

    /// Run the workload for N milliseconds
    #[arg(short, long, default_value = "1000")]
    pub duration_ms: u64,

    /// Worker threads for the contend workload
    #[arg(long, default_value = "4")]
    pub threads: usize,

    /// Do not install the SIGINT hook (stop only at the end of the run)
    #[arg(long)]
    pub no_shutdown_hook: bool,

    /// Suppress status lines
    #[arg(short, long)]
    pub quiet: bool,

    #[command(flatten)]
    pub profile: ProfileFlags,
}
