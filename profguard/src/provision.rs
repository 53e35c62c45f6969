//! Output directory provisioning
//!
//! Guarantees the session has an absolute, writable directory before any
//! instrumentation is armed. Directories are only ever created, never
//! removed.

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::ProvisionError;

/// Prefix of auto-allocated directories (`$TMPDIR/profileXXXXXX`)
const TEMP_DIR_PREFIX: &str = "profile";

/// Materialize the output directory for a session
///
/// An explicit path is created along with any missing parents. `None` (or an
/// empty path) allocates a fresh, uniquely named directory under the system
/// temp dir that outlives the session.
///
/// # Errors
/// Returns an error if the directory cannot be created or resolved
pub fn provision_output_dir(path: Option<&Path>) -> Result<PathBuf, ProvisionError> {
    let dir = match path.filter(|p| !p.as_os_str().is_empty()) {
        Some(path) => {
            fs::create_dir_all(path).map_err(|source| ProvisionError::CreateDir {
                path: path.to_path_buf(),
                source,
            })?;
            path.to_path_buf()
        }
        None => tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir()
            .map_err(ProvisionError::TempDir)?
            .keep(),
    };

    let dir = fs::canonicalize(&dir)
        .map_err(|source| ProvisionError::Resolve { path: dir.clone(), source })?;
    debug!("Provisioned output directory {}", dir.display());
    Ok(dir)
}
