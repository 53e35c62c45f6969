//! Domain model for profguard
//!
//! This module contains core domain types and errors that provide:
//! - The closed set of profiling modes and the files they produce
//! - Structured error handling for each lifecycle stage

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{Mode, BLOCK_PROFILE_FILE, CPU_PROFILE_FILE, MEM_PROFILE_FILE};

pub use errors::{ArmError, ProvisionError, ReleaseError, SessionError};
