// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::{StorageError, StorageErrorKind};
use storage_sys::SysError;
use storage_types::MountRecord;
use thiserror::Error;

/// Service-specific errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{} is already mounted ({})", .0.mount_point, .0.fstype)]
    AlreadyMounted(Box<MountRecord>),

    #[error("Nothing is mounted at {0}")]
    NotMounted(String),

    #[error("Mount point is not empty: {0}")]
    MountPointNotEmpty(String),

    #[error("Source {source_path} overlaps merge target {mount_point}")]
    SourceConflict {
        mount_point: String,
        source_path: String,
    },

    #[error("Missing referenced record: {0}")]
    NilReference(String),

    #[error("Mount point is busy: {0}")]
    Busy(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("External tool failed: {0}")]
    ExternalToolFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            Self::AlreadyMounted(_) => StorageErrorKind::AlreadyMounted,
            Self::NotMounted(_) => StorageErrorKind::NotMounted,
            Self::MountPointNotEmpty(_) => StorageErrorKind::MountPointNotEmpty,
            Self::SourceConflict { .. } => StorageErrorKind::SourceConflict,
            Self::NilReference(_) => StorageErrorKind::NilReference,
            Self::Busy(_) => StorageErrorKind::Busy,
            Self::Conflict(_) => StorageErrorKind::Conflict,
            Self::InvalidEntry(_) => StorageErrorKind::InvalidEntry,
            Self::ExternalToolFailure(_) => StorageErrorKind::ExternalToolFailure,
            Self::NotFound(_) => StorageErrorKind::NotFound,
            Self::InvalidArgument(_) | Self::Config(_) => StorageErrorKind::InvalidInput,
            Self::Timeout(_) => StorageErrorKind::Timeout,
            Self::Io(_) | Self::Serialization(_) | Self::OperationFailed(_) => {
                StorageErrorKind::Internal
            }
            Self::Storage(err) => err.kind,
        }
    }
}

impl From<SysError> for ServiceError {
    fn from(err: SysError) -> Self {
        match err {
            SysError::Io(e) => ServiceError::Io(e),
            SysError::Conflict { .. } => ServiceError::Conflict(err.to_string()),
            SysError::InvalidEntry { .. } => ServiceError::InvalidEntry(err.to_string()),
            SysError::ExternalToolFailure { .. } => {
                ServiceError::ExternalToolFailure(err.to_string())
            }
            SysError::XattrMissing { .. } => ServiceError::NotFound(err.to_string()),
            SysError::InvalidMountInfoLine(_) | SysError::OperationFailed(_) => {
                ServiceError::OperationFailed(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Serialization(err.to_string())
    }
}

impl From<ServiceError> for StorageError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Storage(inner) => inner,
            other => StorageError::new(other.kind(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
