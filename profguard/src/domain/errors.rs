//! Structured error types for profguard
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Mode;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to materialize the session's output directory
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("could not create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not allocate temporary output directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("could not resolve output directory {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while arming a profiling mode
#[derive(Error, Debug)]
pub enum ArmError {
    #[error("could not create {mode} profile {path}: {source}")]
    CreateFile {
        mode: Mode,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not start cpu sampler: {0}")]
    Sampler(#[source] pprof::Error),
}

/// Failure while flushing or closing a profile during release
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("could not build {mode} profile report: {source}")]
    Report {
        mode: Mode,
        #[source]
        source: pprof::Error,
    },

    #[error("could not write {mode} profile {path}: {source}")]
    Write {
        mode: Mode,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} profile already released")]
    AlreadyReleased(Mode),
}

/// Any failure along the session lifecycle
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("start() already called")]
    AlreadyActive,

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Arm(#[from] ArmError),

    #[error(transparent)]
    Release(#[from] ReleaseError),
}
