// SPDX-License-Identifier: GPL-3.0-only

use storage_types::{FilterDecision, MountRecord};

use crate::StorageError;

/// Read-only view of the kernel mount table.
///
/// Implementations never cache; every call reflects current kernel state.
pub trait MountTable: Send + Sync {
    fn get_mounts(
        &self,
        filter: &dyn Fn(&MountRecord) -> FilterDecision,
    ) -> Result<Vec<MountRecord>, StorageError>;

    fn all_mounts(&self) -> Result<Vec<MountRecord>, StorageError> {
        self.get_mounts(&|_| FilterDecision::KEEP)
    }
}

/// Ready-made mount table filters
pub mod filters {
    use std::path::Path;

    use storage_types::{FilterDecision, MountRecord};

    /// Every record whose mount point is exactly `mount_point`.
    ///
    /// Does not stop early: stacked mounts at one path are all reported.
    pub fn by_mount_point(mount_point: &str) -> impl Fn(&MountRecord) -> FilterDecision + '_ {
        move |record: &MountRecord| {
            if record.mount_point == mount_point {
                FilterDecision::KEEP
            } else {
                FilterDecision::SKIP
            }
        }
    }

    /// The single record with kernel mount ID `id`.
    pub fn by_id(id: u32) -> impl Fn(&MountRecord) -> FilterDecision {
        move |record: &MountRecord| {
            if record.id == id {
                FilterDecision::KEEP_AND_STOP
            } else {
                FilterDecision::SKIP
            }
        }
    }

    pub fn by_fstype(fstype: &str) -> impl Fn(&MountRecord) -> FilterDecision + '_ {
        move |record: &MountRecord| FilterDecision {
            skip: record.fstype != fstype,
            stop: false,
        }
    }

    pub fn by_source(source: &str) -> impl Fn(&MountRecord) -> FilterDecision + '_ {
        move |record: &MountRecord| FilterDecision {
            skip: record.source != source,
            stop: false,
        }
    }

    /// Strict descendants of `prefix` (the prefix itself is skipped).
    pub fn under_prefix(prefix: &str) -> impl Fn(&MountRecord) -> FilterDecision + '_ {
        move |record: &MountRecord| {
            let path = Path::new(&record.mount_point);
            let inside = path != Path::new(prefix) && path.starts_with(prefix);
            FilterDecision {
                skip: !inside,
                stop: false,
            }
        }
    }

}
