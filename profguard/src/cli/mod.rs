//! Command-line surface: shared profiling flags and the binary's arguments

pub mod args;
pub mod flags;

pub use args::{Args, Workload};
pub use flags::ProfileFlags;
