//! Command-line flags understood by every profiled program
//!
//! Hosts flatten [`ProfileFlags`] into their own `clap` parser so the same
//! switches work across binaries:
//!
//! ```rust,ignore
//! #[derive(clap::Parser)]
//! struct Args {
//!     #[command(flatten)]
//!     profile: profguard::ProfileFlags,
//! }
//! ```

use clap::Args;
use std::path::PathBuf;

/// Snapshot of externally supplied profiling switches
///
/// Values here override programmatic options when the session configuration
/// is resolved. Every flag can also be supplied through its environment
/// variable.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFlags {
    /// Enables CPU profile
    #[arg(long = "cpuprofile", env = "PROFGUARD_CPU")]
    pub cpu: bool,

    /// Enables memory profile
    #[arg(long = "memprofile", env = "PROFGUARD_MEM")]
    pub mem: bool,

    /// Enables blocking (contention) profile
    #[arg(long = "blockprofile", env = "PROFGUARD_BLOCK")]
    pub block: bool,

    /// Enables memory profile at the given rate (0 = keep configured rate)
    #[arg(long = "memprofilerate", env = "PROFGUARD_MEM_RATE", default_value = "0")]
    pub mem_rate: usize,

    /// Sets the directory where the profile will be written
    #[arg(long = "outputdir", env = "PROFGUARD_OUTPUT_DIR", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Host {
        #[command(flatten)]
        profile: ProfileFlags,
    }

    #[test]
    fn test_flags_parse_go_style_names() {
        let host = Host::parse_from([
            "host",
            "--memprofile",
            "--memprofilerate",
            "1",
            "--outputdir",
            "/tmp/prof",
        ]);
        assert!(host.profile.mem);
        assert!(!host.profile.cpu);
        assert_eq!(host.profile.mem_rate, 1);
        assert_eq!(host.profile.output_dir, Some(PathBuf::from("/tmp/prof")));
    }

    #[test]
    fn test_negative_rate_is_rejected() {
        assert!(Host::try_parse_from(["host", "--memprofilerate", "-4"]).is_err());
    }
}
