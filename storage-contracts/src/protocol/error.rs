// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    InvalidInput,
    NotFound,
    /// Persisted mount table already holds a different entry at the mount point
    Conflict,
    /// Malformed persisted mount table line
    InvalidEntry,
    AlreadyMounted,
    NotMounted,
    MountPointNotEmpty,
    /// Merge source is an ancestor or descendant of its target
    SourceConflict,
    /// Required association points at a missing record
    NilReference,
    Busy,
    ExternalToolFailure,
    Timeout,
    Internal,
}

impl StorageErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput | Self::InvalidEntry => 400,
            Self::NotFound => 404,
            Self::Conflict
            | Self::AlreadyMounted
            | Self::NotMounted
            | Self::MountPointNotEmpty
            | Self::SourceConflict => 409,
            Self::NilReference => 422,
            Self::Busy => 423,
            Self::ExternalToolFailure => 502,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }

    /// Precondition mismatches that a concurrent external change can cause.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::AlreadyMounted | Self::NotMounted | Self::Busy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Internal, message)
    }

    pub fn tool_failure(command: &str, stderr: &str) -> Self {
        Self::new(
            StorageErrorKind::ExternalToolFailure,
            format!("{command} failed: {}", stderr.trim()),
        )
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("I/O error: {err}"))
    }
}
