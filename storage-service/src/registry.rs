// SPDX-License-Identifier: GPL-3.0-only

//! Persistent registry of volumes and merge definitions
//!
//! The registry is a single JSON document. Every mutation runs as a
//! transaction over a copy of the state; the copy replaces the live state
//! only after it has been written to disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage_sys::atomic::write_atomic;
use storage_types::{Merge, MergeDefinition, UNION_FS_LONG, Volume, VolumeState, is_union_fstype};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::paths;

/// Stored form of a merge: associations are kept as volume IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MergeRow {
    id: Uuid,
    mount_point: String,
    fstype: String,
    #[serde(default)]
    source_base_path: Option<String>,
    #[serde(default)]
    source_volume_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default)]
    volumes: Vec<Volume>,
    #[serde(default)]
    merges: Vec<MergeRow>,
}

impl RegistryState {
    fn volume(&self, id: Uuid) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.id == id)
    }

    fn resolve_volumes(&self, ids: &[Uuid]) -> Result<Vec<Volume>> {
        ids.iter()
            .map(|id| {
                self.volume(*id)
                    .cloned()
                    .ok_or_else(|| ServiceError::NilReference(format!("volume {id}")))
            })
            .collect()
    }

    /// Eager load of a merge with its source volumes.
    fn load_merge(&self, row: &MergeRow) -> Result<Merge> {
        Ok(Merge {
            id: row.id,
            mount_point: row.mount_point.clone(),
            fstype: row.fstype.clone(),
            source_base_path: row.source_base_path.clone(),
            source_volumes: self.resolve_volumes(&row.source_volume_ids)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn merge_row_mut(&mut self, id: Uuid) -> Result<&mut MergeRow> {
        self.merges
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ServiceError::NotFound(format!("merge {id}")))
    }

    fn check_mount_point_free(&self, mount_point: &str, except: Option<Uuid>) -> Result<()> {
        let wanted = paths::normalize(mount_point);
        let taken = self
            .volumes
            .iter()
            .any(|v| Some(v.id) != except && paths::normalize(&v.mount_point) == wanted);
        if taken {
            return Err(ServiceError::Conflict(format!(
                "a volume is already registered at {mount_point}"
            )));
        }
        Ok(())
    }

    /// Remove a volume row and rebuild every association that named it.
    fn remove_volume(&mut self, id: Uuid) -> bool {
        let before = self.volumes.len();
        self.volumes.retain(|v| v.id != id);
        if self.volumes.len() == before {
            return false;
        }

        for row in &mut self.merges {
            if !row.source_volume_ids.contains(&id) {
                continue;
            }
            let remaining: Vec<Uuid> = row
                .source_volume_ids
                .iter()
                .copied()
                .filter(|volume_id| *volume_id != id)
                .collect();
            debug!(
                "Merge {} at {} loses volume {} ({} source volume(s) left)",
                row.id,
                row.mount_point,
                id,
                remaining.len()
            );
            row.source_volume_ids = remaining;
            row.updated_at = Utc::now();
        }
        true
    }

    fn check_integrity(&self) -> Result<()> {
        for row in &self.merges {
            self.resolve_volumes(&row.source_volume_ids)?;
        }
        Ok(())
    }
}

fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

fn source_paths(base: Option<&String>, volumes: &[Volume]) -> Vec<String> {
    base.filter(|b| !b.is_empty())
        .cloned()
        .into_iter()
        .chain(volumes.iter().map(|v| v.mount_point.clone()))
        .collect()
}

fn canonical_merge_fstype(fstype: &str) -> String {
    if fstype.is_empty() || is_union_fstype(fstype) {
        UNION_FS_LONG.to_string()
    } else {
        fstype.to_string()
    }
}

#[derive(Debug)]
pub struct MergeRegistry {
    path: Option<PathBuf>,
    state: Mutex<RegistryState>,
}

impl MergeRegistry {
    /// Open the registry at `path`, starting empty when the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                RegistryState::default()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            RegistryState::default()
        };
        info!(
            "Loaded registry {} ({} volume(s), {} merge(s))",
            path.display(),
            state.volumes.len(),
            state.merges.len()
        );
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Registry that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &RegistryState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Apply `change` to a copy of the state and swap it in once persisted.
    /// An error from `change` or from the write leaves the registry untouched.
    fn transaction<T>(&self, change: impl FnOnce(&mut RegistryState) -> Result<T>) -> Result<T> {
        let mut state = self.lock();
        let mut next = state.clone();
        let value = change(&mut next)?;
        if next != *state {
            self.persist(&next)?;
            *state = next;
        }
        Ok(value)
    }

    fn read<T>(&self, query: impl FnOnce(&RegistryState) -> T) -> T {
        query(&self.lock())
    }

    pub fn create_volume(&self, volume: Volume) -> Result<Volume> {
        if volume.mount_point.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "volume mount point is empty".to_string(),
            ));
        }
        self.transaction(|state| {
            if state.volume(volume.id).is_some() {
                return Err(ServiceError::Conflict(format!(
                    "volume {} already exists",
                    volume.id
                )));
            }
            state.check_mount_point_free(&volume.mount_point, None)?;
            state.volumes.push(volume.clone());
            Ok(volume)
        })
    }

    /// Insert or refresh the volume for `volume.device_path`, keeping the
    /// stored ID and creation time of an existing row.
    pub fn upsert_volume(&self, volume: Volume) -> Result<Volume> {
        if volume.mount_point.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "volume mount point is empty".to_string(),
            ));
        }
        self.transaction(|state| {
            let existing = state
                .volumes
                .iter()
                .position(|v| v.device_path == volume.device_path);
            state.check_mount_point_free(&volume.mount_point, existing.map(|i| state.volumes[i].id))?;

            match existing {
                Some(index) => {
                    let stored = &mut state.volumes[index];
                    stored.mount_point = volume.mount_point;
                    stored.fs_uuid = volume.fs_uuid;
                    stored.state = volume.state;
                    Ok(stored.clone())
                }
                None => {
                    state.volumes.push(volume.clone());
                    Ok(volume)
                }
            }
        })
    }

    pub fn get_volume(&self, id: Uuid) -> Option<Volume> {
        self.read(|state| state.volume(id).cloned())
    }

    pub fn volume_by_mount_point(&self, mount_point: &str) -> Option<Volume> {
        let wanted = paths::normalize(mount_point);
        self.read(|state| {
            state
                .volumes
                .iter()
                .find(|v| paths::normalize(&v.mount_point) == wanted)
                .cloned()
        })
    }

    pub fn list_volumes(&self) -> Vec<Volume> {
        self.read(|state| state.volumes.clone())
    }

    /// Returns whether the stored state changed.
    pub fn set_volume_state(&self, id: Uuid, new_state: VolumeState) -> Result<bool> {
        self.transaction(|state| {
            let volume = state
                .volumes
                .iter_mut()
                .find(|v| v.id == id)
                .ok_or_else(|| ServiceError::NotFound(format!("volume {id}")))?;
            if volume.state == new_state {
                return Ok(false);
            }
            volume.state = new_state;
            Ok(true)
        })
    }

    /// Delete a volume and drop it from every merge that referenced it.
    ///
    /// Deleting an unknown volume is a no-op returning `false`.
    pub fn delete_volume(&self, id: Uuid) -> Result<bool> {
        self.transaction(|state| {
            let removed = state.remove_volume(id);
            if removed {
                state.check_integrity().inspect_err(|e| {
                    error!("Aborting deletion of volume {}: {}", id, e);
                })?;
                info!("Deleted volume {}", id);
            }
            Ok(removed)
        })
    }

    /// Delete every volume registered at `mount_point`.
    pub fn delete_volumes_at_mount_point(&self, mount_point: &str) -> Result<usize> {
        let wanted = paths::normalize(mount_point);
        self.transaction(|state| {
            let ids: Vec<Uuid> = state
                .volumes
                .iter()
                .filter(|v| paths::normalize(&v.mount_point) == wanted)
                .map(|v| v.id)
                .collect();
            for id in &ids {
                state.remove_volume(*id);
            }
            state.check_integrity().inspect_err(|e| {
                error!("Aborting volume cleanup at {}: {}", mount_point, e);
            })?;
            if !ids.is_empty() {
                info!("Deleted {} volume(s) at {}", ids.len(), mount_point);
            }
            Ok(ids.len())
        })
    }

    pub fn create_merge(&self, definition: MergeDefinition) -> Result<Merge> {
        if definition.mount_point.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "merge mount point is empty".to_string(),
            ));
        }
        self.transaction(|state| {
            let wanted = paths::normalize(&definition.mount_point);
            if state
                .merges
                .iter()
                .any(|m| paths::normalize(&m.mount_point) == wanted)
            {
                return Err(ServiceError::Conflict(format!(
                    "a merge already targets {}",
                    definition.mount_point
                )));
            }

            let ids = dedup_ids(&definition.source_volume_ids);
            let volumes = state.resolve_volumes(&ids)?;
            paths::check_sources(
                &definition.mount_point,
                &source_paths(definition.source_base_path.as_ref(), &volumes),
            )?;

            let now = Utc::now();
            let row = MergeRow {
                id: Uuid::new_v4(),
                mount_point: definition.mount_point.clone(),
                fstype: canonical_merge_fstype(&definition.fstype),
                source_base_path: definition.source_base_path.clone(),
                source_volume_ids: ids,
                created_at: now,
                updated_at: now,
            };
            let merge = state.load_merge(&row)?;
            state.merges.push(row);
            info!("Registered merge {} at {}", merge.id, merge.mount_point);
            Ok(merge)
        })
    }

    pub fn get_merge(&self, id: Uuid) -> Result<Option<Merge>> {
        self.read(|state| {
            state
                .merges
                .iter()
                .find(|m| m.id == id)
                .map(|row| state.load_merge(row))
                .transpose()
        })
    }

    pub fn merge_by_mount_point(&self, mount_point: &str) -> Result<Option<Merge>> {
        let wanted = paths::normalize(mount_point);
        self.read(|state| {
            state
                .merges
                .iter()
                .find(|m| paths::normalize(&m.mount_point) == wanted)
                .map(|row| state.load_merge(row))
                .transpose()
        })
    }

    pub fn list_merges(&self) -> Result<Vec<Merge>> {
        self.read(|state| state.merges.iter().map(|row| state.load_merge(row)).collect())
    }

    /// Replace the merge's source volumes with exactly `volume_ids`.
    pub fn replace_merge_sources(&self, id: Uuid, volume_ids: &[Uuid]) -> Result<Merge> {
        self.transaction(|state| {
            let ids = dedup_ids(volume_ids);
            let volumes = state.resolve_volumes(&ids)?;
            let row = state.merge_row_mut(id)?;
            paths::check_sources(
                &row.mount_point,
                &source_paths(row.source_base_path.as_ref(), &volumes),
            )?;
            row.source_volume_ids = ids;
            row.updated_at = Utc::now();
            let row = row.clone();
            state.load_merge(&row)
        })
    }

    pub fn delete_merge(&self, id: Uuid) -> Result<bool> {
        self.transaction(|state| {
            let before = state.merges.len();
            state.merges.retain(|m| m.id != id);
            Ok(state.merges.len() != before)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(volumes: &[(&str, &str)]) -> (MergeRegistry, Vec<Volume>) {
        let registry = MergeRegistry::in_memory();
        let created = volumes
            .iter()
            .map(|(device, mount_point)| {
                registry
                    .create_volume(Volume::new(*device, *mount_point))
                    .unwrap()
            })
            .collect();
        (registry, created)
    }

    fn definition(mount_point: &str, volumes: &[&Volume]) -> MergeDefinition {
        MergeDefinition {
            mount_point: mount_point.to_string(),
            source_volume_ids: volumes.iter().map(|v| v.id).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn deleting_a_volume_preserves_the_other_sources() {
        let (registry, v) = registry_with(&[
            ("/dev/sda1", "/mnt/sda"),
            ("/dev/sdb1", "/mnt/sdb"),
            ("/dev/sdc1", "/mnt/sdc"),
        ]);
        let media = registry
            .create_merge(definition("/media", &[&v[0], &v[1], &v[2]]))
            .unwrap();
        let other = registry
            .create_merge(definition("/backup", &[&v[1]]))
            .unwrap();

        assert!(registry.delete_volume(v[1].id).unwrap());

        let media = registry.get_merge(media.id).unwrap().unwrap();
        assert_eq!(media.volume_ids(), vec![v[0].id, v[2].id]);

        let other = registry.get_merge(other.id).unwrap().unwrap();
        assert!(other.source_volumes.is_empty());
        assert!(registry.get_volume(v[1].id).is_none());
    }

    #[test]
    fn deleting_an_unreferenced_or_unknown_volume_is_a_no_op() {
        let (registry, v) = registry_with(&[("/dev/sda1", "/mnt/sda")]);
        registry
            .create_merge(definition("/media", &[]))
            .unwrap();

        assert!(registry.delete_volume(v[0].id).unwrap());
        assert!(!registry.delete_volume(v[0].id).unwrap());
        assert!(!registry.delete_volume(Uuid::new_v4()).unwrap());
        assert_eq!(registry.list_merges().unwrap().len(), 1);
    }

    #[test]
    fn delete_by_mount_point_cleans_merges() {
        let (registry, v) = registry_with(&[("/dev/sda1", "/mnt/sda"), ("/dev/sdb1", "/mnt/sdb")]);
        let merge = registry
            .create_merge(definition("/media", &[&v[0], &v[1]]))
            .unwrap();

        assert_eq!(registry.delete_volumes_at_mount_point("/mnt/sda/").unwrap(), 1);
        assert_eq!(registry.delete_volumes_at_mount_point("/mnt/none").unwrap(), 0);

        let merge = registry.get_merge(merge.id).unwrap().unwrap();
        assert_eq!(merge.volume_ids(), vec![v[1].id]);
    }

    #[test]
    fn ancestor_target_is_rejected_in_either_order() {
        // Volume registered first, then the merge.
        let (registry, v) = registry_with(&[("/dev/sda1", "/mnt/pool/disk1")]);
        let err = registry
            .create_merge(definition("/mnt/pool", &[&v[0]]))
            .unwrap_err();
        assert!(matches!(err, ServiceError::SourceConflict { .. }));

        // Merge registered first, then the overlapping volume attached.
        let merge = registry.create_merge(definition("/mnt/pool", &[])).unwrap();
        let err = registry
            .replace_merge_sources(merge.id, &[v[0].id])
            .unwrap_err();
        assert!(matches!(err, ServiceError::SourceConflict { .. }));
        assert!(registry.get_merge(merge.id).unwrap().unwrap().source_volumes.is_empty());

        // Descendant target.
        let (registry, v) = registry_with(&[("/dev/sdb1", "/mnt/pool")]);
        let err = registry
            .create_merge(definition("/mnt/pool/inner", &[&v[0]]))
            .unwrap_err();
        assert!(matches!(err, ServiceError::SourceConflict { .. }));
    }

    #[test]
    fn base_path_is_checked_too() {
        let registry = MergeRegistry::in_memory();
        let err = registry
            .create_merge(MergeDefinition {
                mount_point: "/DATA".to_string(),
                source_base_path: Some("/DATA/files".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::SourceConflict { .. }));
    }

    #[test]
    fn unknown_volume_is_a_nil_reference() {
        let registry = MergeRegistry::in_memory();
        let err = registry
            .create_merge(MergeDefinition {
                mount_point: "/media".to_string(),
                source_volume_ids: vec![Uuid::new_v4()],
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::NilReference(_)));
        assert!(registry.list_merges().unwrap().is_empty());
    }

    #[test]
    fn mount_points_are_unique() {
        let (registry, _) = registry_with(&[("/dev/sda1", "/mnt/sda")]);
        assert!(matches!(
            registry.create_volume(Volume::new("/dev/sdb1", "/mnt/sda/")),
            Err(ServiceError::Conflict(_))
        ));

        registry.create_merge(definition("/media", &[])).unwrap();
        assert!(matches!(
            registry.create_merge(definition("/media", &[])),
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            registry.create_merge(definition("", &[])),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn merge_fstype_defaults_to_the_union_filesystem() {
        let registry = MergeRegistry::in_memory();
        let merge = registry
            .create_merge(MergeDefinition {
                mount_point: "/media".to_string(),
                fstype: "mergerfs".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(merge.fstype, UNION_FS_LONG);
    }

    #[test]
    fn upsert_keeps_identity_of_known_devices() {
        let registry = MergeRegistry::in_memory();
        let first = registry
            .upsert_volume(Volume::new("/dev/sdb1", "/mnt/sdb"))
            .unwrap();

        let mut again = Volume::new("/dev/sdb1", "/mnt/disk-b");
        again.state = VolumeState::Mounted;
        let second = registry.upsert_volume(again).unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.mount_point, "/mnt/disk-b");
        assert_eq!(registry.list_volumes().len(), 1);
        assert!(registry.set_volume_state(first.id, VolumeState::Mounted).is_ok());
        assert!(!registry.set_volume_state(first.id, VolumeState::Mounted).unwrap());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");

        let registry = MergeRegistry::open(&path).unwrap();
        let volume = registry
            .create_volume(Volume::new("/dev/sda1", "/mnt/sda"))
            .unwrap();
        let merge = registry
            .create_merge(definition("/media", &[&volume]))
            .unwrap();
        drop(registry);

        let reopened = MergeRegistry::open(&path).unwrap();
        let loaded = reopened.merge_by_mount_point("/media").unwrap().unwrap();
        assert_eq!(loaded.id, merge.id);
        assert_eq!(loaded.source_volumes, vec![volume]);
    }

    #[test]
    fn failed_transaction_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = MergeRegistry::open(&path).unwrap();
        let volume = registry
            .create_volume(Volume::new("/dev/sda1", "/mnt/sda"))
            .unwrap();
        let on_disk = fs::read_to_string(&path).unwrap();

        assert!(registry
            .create_merge(definition("/mnt", &[&volume]))
            .is_err());

        assert!(registry.list_merges().unwrap().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), on_disk);
    }

    #[test]
    fn delete_merge_removes_only_that_merge() {
        let (registry, v) = registry_with(&[("/dev/sda1", "/mnt/sda")]);
        let media = registry.create_merge(definition("/media", &[&v[0]])).unwrap();
        let backup = registry.create_merge(definition("/backup", &[&v[0]])).unwrap();

        assert!(registry.delete_merge(media.id).unwrap());
        assert!(!registry.delete_merge(media.id).unwrap());

        assert!(registry.get_merge(media.id).unwrap().is_none());
        let left: Vec<Uuid> = registry.list_merges().unwrap().iter().map(|m| m.id).collect();
        assert_eq!(left, vec![backup.id]);
        assert_eq!(registry.list_volumes(), v);
    }
}
