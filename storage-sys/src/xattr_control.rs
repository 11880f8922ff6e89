// SPDX-License-Identifier: GPL-3.0-only

//! Live mergerfs source control through extended attributes
//!
//! mergerfs exposes its runtime settings as `user.mergerfs.*` attributes on a
//! control file at the root of the mount.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use storage_contracts::{SourceControl, StorageError};
use storage_types::{join_sources, split_sources};
use tracing::{debug, info};

use crate::error::{Result, SysError};

pub const CONTROL_FILE: &str = ".mergerfs";
pub const SRCMOUNTS_XATTR: &str = "user.mergerfs.srcmounts";
const XATTR_PREFIX: &str = "user.mergerfs.";

#[derive(Debug, Clone, Default)]
pub struct XattrSourceControl;

impl XattrSourceControl {
    pub fn new() -> Self {
        Self
    }

    pub fn control_path(mount_point: &str) -> PathBuf {
        Path::new(mount_point).join(CONTROL_FILE)
    }

    fn read(&self, path: &Path, key: &str) -> Result<String> {
        let value = xattr::get(path, key)?.ok_or_else(|| SysError::XattrMissing {
            path: path.display().to_string(),
            key: key.to_string(),
        })?;
        Ok(String::from_utf8_lossy(&value).into_owned())
    }

    fn write(&self, mount_point: &str, value: &str) -> Result<()> {
        let path = Self::control_path(mount_point);
        debug!("Setting {} on {:?} to {}", SRCMOUNTS_XATTR, path, value);
        xattr::set(&path, SRCMOUNTS_XATTR, value.as_bytes())?;
        Ok(())
    }

    pub fn read_all(&self, mount_point: &str) -> Result<BTreeMap<String, String>> {
        let path = Self::control_path(mount_point);
        let mut settings = BTreeMap::new();
        for name in xattr::list(&path)? {
            let name = name.to_string_lossy().into_owned();
            if !name.starts_with(XATTR_PREFIX) {
                continue;
            }
            let value = self.read(&path, &name)?;
            settings.insert(name, value);
        }
        Ok(settings)
    }

    pub fn read_sources(&self, mount_point: &str) -> Result<Vec<String>> {
        let raw = self.read(&Self::control_path(mount_point), SRCMOUNTS_XATTR)?;
        Ok(split_sources(&raw))
    }
}

impl SourceControl for XattrSourceControl {
    fn list_all(&self, mount_point: &str) -> std::result::Result<BTreeMap<String, String>, StorageError> {
        Ok(self.read_all(mount_point)?)
    }

    fn get_sources(&self, mount_point: &str) -> std::result::Result<Vec<String>, StorageError> {
        Ok(self.read_sources(mount_point)?)
    }

    fn set_sources(&self, mount_point: &str, sources: &[String]) -> std::result::Result<(), StorageError> {
        self.write(mount_point, &join_sources(sources))?;
        info!("Replaced sources of {} with {:?}", mount_point, sources);
        Ok(())
    }

    fn add_source(&self, mount_point: &str, source: &str) -> std::result::Result<(), StorageError> {
        self.write(mount_point, &format!("+{source}"))?;
        info!("Added source {} to {}", source, mount_point);
        Ok(())
    }

    fn remove_source(&self, mount_point: &str, source: &str) -> std::result::Result<(), StorageError> {
        self.write(mount_point, &format!("-{source}"))?;
        info!("Removed source {} from {}", source, mount_point);
        Ok(())
    }
}
