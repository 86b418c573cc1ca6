//! Error types for sync operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::vault::VaultError;

/// Errors from outbound/inbound sync operations.
///
/// Policy skips and a missing external root are not errors; those paths
/// return `Ok(())`. Bulk operations catch and log these per item instead of
/// aborting the traversal.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("vault operation failed: {0}")]
    Vault(#[from] VaultError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
