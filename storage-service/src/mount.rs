// SPDX-License-Identifier: GPL-3.0-only

//! Mount and unmount orchestration
//!
//! Every operation re-reads the kernel mount table right before acting and
//! claims the mount point in the busy set for its whole duration.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use storage_contracts::{CommandRunner, EventPublisher, MountTable, filters};
use storage_sys::fstab::DEFAULT_ENTRY_COMMENT;
use storage_sys::{FstabStore, UnionMountAdapter};
use storage_types::{FstabEntry, MountRecord, MountRequest};
use tracing::{debug, error, info, warn};

use crate::busy::{BusyGuard, BusySet};
use crate::error::{Result, ServiceError};
use crate::events::{self, VOLUME_MOUNTED, VOLUME_UNMOUNTED};
use crate::paths;
use crate::registry::MergeRegistry;

const MOUNT: &str = "mount";
const UMOUNT: &str = "umount";

pub struct MountReconciler {
    table: Arc<dyn MountTable>,
    runner: Arc<dyn CommandRunner>,
    fstab: FstabStore,
    registry: Arc<MergeRegistry>,
    events: Arc<dyn EventPublisher>,
    adapter: UnionMountAdapter,
    busy: BusySet,
}

impl MountReconciler {
    pub fn new(
        table: Arc<dyn MountTable>,
        runner: Arc<dyn CommandRunner>,
        fstab: FstabStore,
        registry: Arc<MergeRegistry>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            table,
            runner,
            fstab,
            registry,
            events,
            adapter: UnionMountAdapter::new(),
            busy: BusySet::new(),
        }
    }

    pub fn adapter(&self) -> &UnionMountAdapter {
        &self.adapter
    }

    /// Claim `mount_point` for an operation that does not go through
    /// `mount`/`unmount`, such as a live source update.
    pub fn claim(&self, mount_point: &str) -> Result<BusyGuard<'_>> {
        self.busy.try_acquire(mount_point)
    }

    /// Current records at exactly `mount_point`, bottom of the stack first.
    pub fn records_at(&self, mount_point: &str) -> Result<Vec<MountRecord>> {
        Ok(self.table.get_mounts(&filters::by_mount_point(mount_point))?)
    }

    pub fn mount(&self, request: MountRequest) -> Result<MountRecord> {
        if request.source.is_empty() || request.mount_point.is_empty() || request.fstype.is_empty()
        {
            return Err(ServiceError::InvalidArgument(format!(
                "mount needs a source, a mount point and a filesystem type, got {request:?}"
            )));
        }

        let _guard = self.busy.try_acquire(&request.mount_point)?;
        let mount_point = request.mount_point.clone();

        // 1. Already mounted with this type
        let wanted_fstype = self.adapter.canonical_fstype(&request.fstype);
        if let Some(existing) = self
            .records_at(&mount_point)?
            .into_iter()
            .find(|r| self.adapter.canonical_fstype(&r.fstype) == wanted_fstype)
        {
            info!("{} is already mounted as {}", mount_point, existing.fstype);
            return Err(ServiceError::AlreadyMounted(Box::new(existing)));
        }

        // 2. Target directory exists and is empty
        prepare_mount_point(Path::new(&mount_point))?;

        let request = self.adapter.pre_mount(request);

        let fstab_entry = request.persist.then(|| fstab_entry_for(&request));
        if let Some(entry) = &fstab_entry {
            if let Some(existing) = self.fstab.get_entry_by_mount_point(&mount_point)? {
                if existing != *entry {
                    return Err(ServiceError::Conflict(format!(
                        "fstab already has a different entry for {mount_point}: {existing:?}"
                    )));
                }
            }
        }

        let mut args = vec!["-t".to_string(), request.fstype.clone()];
        if !request.options.is_empty() {
            args.push("-o".to_string());
            args.push(request.options.clone());
        }
        args.push(request.source.clone());
        args.push(mount_point.clone());

        info!("Mounting {} at {} ({})", request.source, mount_point, request.fstype);
        self.runner.run_checked(MOUNT, &args)?;

        let mut records = self.records_at(&mount_point)?;
        if records.len() > 1 {
            warn!(
                "Found {} mount records at {} after mounting, using the first",
                records.len(),
                mount_point
            );
        }
        if records.is_empty() {
            return Err(ServiceError::OperationFailed(format!(
                "mount reported success but nothing is mounted at {mount_point}"
            )));
        }
        let record = self.adapter.post_mount(&request, records.swap_remove(0));

        if let Some(entry) = &fstab_entry {
            // The mount itself stays in place if persisting fails.
            self.fstab
                .add_with_comment(entry, false, Some(DEFAULT_ENTRY_COMMENT))
                .inspect_err(|e| {
                    error!("Mounted {} but failed to persist it in fstab: {}", mount_point, e);
                })?;
        }

        if !self.adapter.applies_to(&record.fstype) {
            events::notify(
                self.events.as_ref(),
                VOLUME_MOUNTED,
                &[
                    ("mount_point", record.mount_point.as_str()),
                    ("source", record.source.as_str()),
                    ("fstype", record.fstype.as_str()),
                ],
            );
        }

        Ok(record)
    }

    /// Unmount `mount_point` and everything mounted below it.
    ///
    /// Once the kernel has released the mount the operation is reported as a
    /// success; cleanup failures afterwards are only logged.
    pub fn unmount(&self, mount_point: &str) -> Result<()> {
        let _guard = self.busy.try_acquire(mount_point)?;

        if self.records_at(mount_point)?.is_empty() {
            return Err(ServiceError::NotMounted(mount_point.to_string()));
        }

        let mut children: Vec<String> = self
            .table
            .get_mounts(&filters::under_prefix(mount_point))?
            .into_iter()
            .map(|r| r.mount_point)
            .collect();
        // Deepest first
        children.sort_by(|a, b| paths::depth(b).cmp(&paths::depth(a)).then_with(|| a.cmp(b)));
        children.dedup();

        for child in &children {
            info!("Unmounting nested mount {}", child);
            self.umount(child)?;
        }

        info!("Unmounting {}", mount_point);
        self.umount(mount_point)?;

        for path in children.iter().map(String::as_str).chain([mount_point]) {
            self.cleanup_after_unmount(path);
        }

        events::notify(
            self.events.as_ref(),
            VOLUME_UNMOUNTED,
            &[("mount_point", mount_point)],
        );
        Ok(())
    }

    fn umount(&self, mount_point: &str) -> Result<()> {
        let args = vec![
            "--force".to_string(),
            "--quiet".to_string(),
            mount_point.to_string(),
        ];
        self.runner.run_checked(UMOUNT, &args)?;
        Ok(())
    }

    fn cleanup_after_unmount(&self, mount_point: &str) {
        if !self.records_at(mount_point).is_ok_and(|r| r.is_empty()) {
            // Stacked mount still present: its fstab entry and volume stay.
            debug!("{} is still mounted, skipping cleanup", mount_point);
            return;
        }

        match fs::remove_dir(mount_point) {
            Ok(()) => debug!("Removed mount point directory {}", mount_point),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Keeping mount point directory {}: {}", mount_point, e),
        }

        if let Err(e) = self.fstab.remove_by_mount_point(mount_point, false) {
            error!("Failed to remove fstab entry for {}: {}", mount_point, e);
        }

        if let Err(e) = self.registry.delete_volumes_at_mount_point(mount_point) {
            error!("Failed to remove registry volumes at {}: {}", mount_point, e);
        }
    }
}

fn fstab_entry_for(request: &MountRequest) -> FstabEntry {
    let options = if request.options.is_empty() {
        "defaults"
    } else {
        request.options.as_str()
    };
    FstabEntry::new(
        request.source.clone(),
        request.mount_point.clone(),
        request.fstype.clone(),
        options,
        0,
        0,
    )
}

/// Create the directory if missing; refuse one that has content.
fn prepare_mount_point(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        debug!("Created mount point {}", path.display());
        return Ok(());
    }
    if !path.is_dir() {
        return Err(ServiceError::InvalidArgument(format!(
            "mount point {} is not a directory",
            path.display()
        )));
    }
    if fs::read_dir(path)?.next().is_some() {
        return Err(ServiceError::MountPointNotEmpty(
            path.display().to_string(),
        ));
    }
    Ok(())
}
