// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::{StorageError, StorageErrorKind};
use storage_types::FstabEntry;
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fstab already has a different entry for {mount_point}: {existing:?}")]
    Conflict {
        mount_point: String,
        existing: Box<FstabEntry>,
    },

    #[error("invalid fstab entry on line {line}: {reason}")]
    InvalidEntry { line: usize, reason: String },

    #[error("invalid mountinfo line: {0}")]
    InvalidMountInfoLine(String),

    #[error("{command} failed: {stderr}")]
    ExternalToolFailure { command: String, stderr: String },

    #[error("extended attribute {key} is not available on {path}")]
    XattrMissing { path: String, key: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl From<SysError> for StorageError {
    fn from(err: SysError) -> Self {
        let kind = match &err {
            SysError::Conflict { .. } => StorageErrorKind::Conflict,
            SysError::InvalidEntry { .. } => StorageErrorKind::InvalidEntry,
            SysError::ExternalToolFailure { .. } => StorageErrorKind::ExternalToolFailure,
            SysError::XattrMissing { .. } => StorageErrorKind::NotFound,
            SysError::Io(_) | SysError::InvalidMountInfoLine(_) | SysError::OperationFailed(_) => {
                StorageErrorKind::Internal
            }
        };
        StorageError::new(kind, err.to_string())
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
