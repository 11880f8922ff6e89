// SPDX-License-Identifier: GPL-3.0-only

//! Volume data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a registered volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    #[default]
    Unknown,
    Mounted,
    Unmounted,
}

/// A serial disk known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Stable identifier assigned when the disk is first registered
    pub id: Uuid,

    /// Device path (e.g., "/dev/sdb1")
    pub device_path: String,

    /// Filesystem UUID reported by the device, if any
    #[serde(default)]
    pub fs_uuid: Option<String>,

    /// Where the volume is mounted when active
    pub mount_point: String,

    pub state: VolumeState,

    pub created_at: DateTime<Utc>,
}

impl Volume {
    pub fn new(device_path: impl Into<String>, mount_point: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_path: device_path.into(),
            fs_uuid: None,
            mount_point: mount_point.into(),
            state: VolumeState::Unknown,
            created_at: Utc::now(),
        }
    }
}
