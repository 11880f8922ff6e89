// SPDX-License-Identifier: GPL-3.0-only

//! Merge (union mount) data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Volume;

/// A union-mount definition with its source volumes eagerly loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merge {
    pub id: Uuid,

    /// Target mount point (unique across merges, never empty)
    pub mount_point: String,

    /// Filesystem type tag (the union filesystem in practice)
    pub fstype: String,

    /// Optional directory mounted ahead of every source volume
    pub source_base_path: Option<String>,

    /// Source volumes, in association order
    pub source_volumes: Vec<Volume>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merge {
    /// Source paths in mount order: the base path first, then each volume.
    pub fn source_paths(&self) -> Vec<String> {
        self.source_base_path
            .iter()
            .filter(|base| !base.is_empty())
            .cloned()
            .chain(self.source_volumes.iter().map(|v| v.mount_point.clone()))
            .collect()
    }

    pub fn volume_ids(&self) -> Vec<Uuid> {
        self.source_volumes.iter().map(|v| v.id).collect()
    }
}

/// Caller input for creating a merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDefinition {
    pub mount_point: String,
    /// Defaults to the union filesystem when empty
    #[serde(default)]
    pub fstype: String,
    #[serde(default)]
    pub source_base_path: Option<String>,
    #[serde(default)]
    pub source_volume_ids: Vec<Uuid>,
}
