// SPDX-License-Identifier: GPL-3.0-only

//! Block device data model
//!
//! Mirrors the subset of `lsblk` columns the service needs to register a disk
//! as a volume.

use serde::{Deserialize, Serialize};

/// One block device as reported by `lsblk --json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Device path (e.g., "/dev/sdb1")
    pub name: String,

    /// Filesystem UUID, if the device carries a filesystem
    #[serde(default)]
    pub uuid: Option<String>,

    /// Filesystem type (e.g., "ext4")
    #[serde(default)]
    pub fstype: Option<String>,

    /// Current mount point, if mounted
    #[serde(default)]
    pub mountpoint: Option<String>,

    /// Device type ("disk", "part", "loop", ...)
    #[serde(default, rename = "type")]
    pub kind: String,

    /// Partitions and other children
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// Depth-first flattening of this device and all of its children
    pub fn flatten(&self) -> Vec<BlockDevice> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<BlockDevice>) {
        out.push(BlockDevice {
            children: Vec::new(),
            ..self.clone()
        });
        for child in &self.children {
            child.flatten_into(out);
        }
    }

    pub fn has_filesystem(&self) -> bool {
        self.fstype.as_deref().is_some_and(|fs| !fs.is_empty())
    }
}
