// SPDX-License-Identifier: GPL-3.0-only

//! Storage service facade
//!
//! Wires the reconcilers to their collaborators and exposes the structural
//! operations together with the periodic sweep.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use storage_contracts::{CommandRunner, EventPublisher, MountTable, SourceControl};
use storage_sys::{
    BlockDeviceLister, FstabStore, ProcMountTable, SystemCommandRunner, TtlCache,
    XattrSourceControl,
};
use storage_types::{BlockDevice, Merge, MergeDefinition, MountRequest, Volume, VolumeState};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::events::TracingPublisher;
use crate::merge::{MergeOutcome, MergeReconciler};
use crate::mount::MountReconciler;
use crate::paths;
use crate::registry::MergeRegistry;

/// External collaborators the service runs against
pub struct Collaborators {
    pub table: Arc<dyn MountTable>,
    pub runner: Arc<dyn CommandRunner>,
    pub sources: Arc<dyn SourceControl>,
    pub events: Arc<dyn EventPublisher>,
}

impl Collaborators {
    /// The real system: `/proc/self/mountinfo`, external tools and xattrs.
    pub fn system() -> Self {
        Self {
            table: Arc::new(ProcMountTable::new()),
            runner: Arc::new(SystemCommandRunner::new()),
            sources: Arc::new(XattrSourceControl::new()),
            events: Arc::new(TracingPublisher),
        }
    }
}

/// Summary of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub volumes_changed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicting: usize,
    pub failed: usize,
}

pub struct StorageService {
    config: Config,
    table: Arc<dyn MountTable>,
    registry: Arc<MergeRegistry>,
    mounts: Arc<MountReconciler>,
    merges: MergeReconciler,
    devices: Arc<BlockDeviceLister>,
}

impl StorageService {
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        let registry = Arc::new(MergeRegistry::open(&config.app.registry_path)?);
        Ok(Self::with_registry(config, collaborators, registry))
    }

    pub fn with_registry(
        config: Config,
        collaborators: Collaborators,
        registry: Arc<MergeRegistry>,
    ) -> Self {
        let Collaborators {
            table,
            runner,
            sources,
            events,
        } = collaborators;

        let mounts = Arc::new(MountReconciler::new(
            table.clone(),
            runner.clone(),
            FstabStore::new(&config.mount.fstab_path),
            registry.clone(),
            events.clone(),
        ));
        let merges = MergeReconciler::new(
            mounts.clone(),
            table.clone(),
            sources,
            registry.clone(),
            events,
            config.merge.mount_options.clone(),
        );
        let devices = Arc::new(BlockDeviceLister::new(
            runner,
            TtlCache::new(config.mount.device_cache_ttl()),
        ));

        Self {
            config,
            table,
            registry,
            mounts,
            merges,
            devices,
        }
    }

    pub fn registry(&self) -> &MergeRegistry {
        &self.registry
    }

    /// Look up a block device, bounded by the configured command timeout.
    pub async fn resolve_device(&self, device_path: &str) -> Result<BlockDevice> {
        let devices = self.devices.clone();
        let path = device_path.to_string();
        let timeout = self.config.mount.command_timeout();

        let lookup = tokio::task::spawn_blocking(move || devices.find(&path));
        let found = tokio::time::timeout(timeout, lookup)
            .await
            .map_err(|_| {
                ServiceError::Timeout(format!(
                    "listing block devices took longer than {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| ServiceError::OperationFailed(format!("device lookup task failed: {e}")))??;

        found.ok_or_else(|| ServiceError::NotFound(format!("block device {device_path}")))
    }

    /// Mount a block device and register it as a volume.
    pub async fn mount_volume(
        &self,
        device_path: &str,
        mount_point: &str,
        persist: bool,
    ) -> Result<Volume> {
        let device = self.resolve_device(device_path).await?;
        let Some(fstype) = device.fstype.clone().filter(|fs| !fs.is_empty()) else {
            return Err(ServiceError::InvalidArgument(format!(
                "{device_path} has no filesystem"
            )));
        };

        let mut request = MountRequest::new(device_path, mount_point, fstype, "");
        request.persist = persist;

        let mounts = self.mounts.clone();
        let record = tokio::task::spawn_blocking(move || mounts.mount(request))
            .await
            .map_err(|e| ServiceError::OperationFailed(format!("mount task failed: {e}")))??;
        self.devices.invalidate();

        let mut volume = Volume::new(device_path, record.mount_point);
        volume.fs_uuid = device.uuid;
        volume.state = VolumeState::Mounted;
        self.registry.upsert_volume(volume)
    }

    pub async fn unmount_volume(&self, mount_point: &str) -> Result<()> {
        let mounts = self.mounts.clone();
        let mount_point = mount_point.to_string();
        tokio::task::spawn_blocking(move || mounts.unmount(&mount_point))
            .await
            .map_err(|e| ServiceError::OperationFailed(format!("unmount task failed: {e}")))??;
        self.devices.invalidate();
        Ok(())
    }

    /// Forget a volume permanently; merges drop it from their sources.
    pub fn forget_volume(&self, id: Uuid) -> Result<bool> {
        self.registry.delete_volume(id)
    }

    /// Register a merge and bring it up right away.
    pub fn create_merge(&self, definition: MergeDefinition) -> Result<(Merge, MergeOutcome)> {
        let merge = self.registry.create_merge(definition)?;
        match self.merges.reconcile(&merge) {
            Ok(outcome) => Ok((merge, outcome)),
            Err(e) => {
                // A merge that never mounted is not kept around.
                if let Err(rollback) = self.registry.delete_merge(merge.id) {
                    error!("Failed to drop unmounted merge {}: {}", merge.id, rollback);
                }
                Err(e)
            }
        }
    }

    /// Replace a merge's source volumes and apply the change to the live mount.
    pub fn update_merge_sources(
        &self,
        id: Uuid,
        volume_ids: &[Uuid],
    ) -> Result<(Merge, MergeOutcome)> {
        let merge = self.registry.replace_merge_sources(id, volume_ids)?;
        let outcome = self.merges.reconcile(&merge)?;
        Ok((merge, outcome))
    }

    /// Sync each registered volume's state with the kernel mount table.
    pub fn refresh_volume_states(&self) -> Result<usize> {
        let mounted: HashSet<_> = self
            .table
            .all_mounts()?
            .into_iter()
            .map(|r| paths::normalize(&r.mount_point))
            .collect();

        let mut changed = 0;
        for volume in self.registry.list_volumes() {
            let state = if mounted.contains(&paths::normalize(&volume.mount_point)) {
                VolumeState::Mounted
            } else {
                VolumeState::Unmounted
            };
            if self.registry.set_volume_state(volume.id, state)? {
                debug!("Volume {} at {} is now {:?}", volume.id, volume.mount_point, state);
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Make sure the configured default merge is registered.
    pub fn ensure_default_merge(&self) -> Result<Option<Merge>> {
        let merge_config = &self.config.merge;
        let Some(mount_point) = merge_config.default_mount_point.as_deref() else {
            return Ok(None);
        };
        if !merge_config.enable {
            return Ok(None);
        }
        if let Some(existing) = self.registry.merge_by_mount_point(mount_point)? {
            return Ok(Some(existing));
        }

        if let Some(base) = &merge_config.default_base_path {
            fs::create_dir_all(base)?;
        }
        let merge = self.registry.create_merge(MergeDefinition {
            mount_point: mount_point.to_string(),
            source_base_path: merge_config.default_base_path.clone(),
            ..Default::default()
        })?;
        info!("Registered default merge at {}", merge.mount_point);
        Ok(Some(merge))
    }

    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.refresh_volume_states() {
            Ok(changed) => report.volumes_changed = changed,
            Err(e) => error!("Failed to refresh volume states: {}", e),
        }

        if !self.config.merge.enable {
            return report;
        }

        match self.merges.reconcile_all() {
            Ok(results) => {
                for merge in results {
                    match merge.result {
                        Ok(MergeOutcome::Created(_)) => report.created += 1,
                        Ok(MergeOutcome::Updated { .. }) => report.updated += 1,
                        Ok(MergeOutcome::Unchanged | MergeOutcome::NoSources) => {
                            report.unchanged += 1
                        }
                        Ok(MergeOutcome::Conflicting { .. }) => report.conflicting += 1,
                        Err(_) => report.failed += 1,
                    }
                }
            }
            Err(e) => error!("Failed to load merges: {}", e),
        }

        debug!("Sweep finished: {:?}", report);
        report
    }
}
