// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use crate::StorageError;

/// Live control channel of an active union mount
pub trait SourceControl: Send + Sync {
    /// Every control key/value currently exposed by the mount
    fn list_all(&self, mount_point: &str) -> Result<BTreeMap<String, String>, StorageError>;

    fn get_sources(&self, mount_point: &str) -> Result<Vec<String>, StorageError>;

    /// Replace the whole source list
    fn set_sources(&self, mount_point: &str, sources: &[String]) -> Result<(), StorageError>;

    fn add_source(&self, mount_point: &str, source: &str) -> Result<(), StorageError>;

    fn remove_source(&self, mount_point: &str, source: &str) -> Result<(), StorageError>;
}
