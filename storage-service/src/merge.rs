// SPDX-License-Identifier: GPL-3.0-only

//! Merge reconciliation
//!
//! Each registered merge is compared with the kernel mount table and driven
//! toward its definition: absent merges are mounted, mounted ones get their
//! sources updated in place, and foreign mounts are left alone.

use std::sync::Arc;

use storage_contracts::{EventPublisher, MountTable, SourceControl, filters};
use storage_types::{Merge, MountRecord, MountRequest, join_sources};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::events::{self, MERGE_CREATED, MERGE_UPDATED};
use crate::mount::MountReconciler;
use crate::paths;
use crate::registry::MergeRegistry;

/// What the kernel currently has at a merge's mount point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeState {
    Absent,
    PresentMatching(MountRecord),
    PresentConflicting(MountRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Created(MountRecord),
    Updated {
        added: Vec<String>,
        removed: Vec<String>,
    },
    Unchanged,
    /// A mount of another filesystem type occupies the target
    Conflicting { fstype: String },
    /// Nothing to mount yet
    NoSources,
}

#[derive(Debug)]
pub struct MergeReport {
    pub merge_id: Uuid,
    pub mount_point: String,
    pub result: Result<MergeOutcome>,
}

/// Difference between the live and desired source lists, compared as sets.
/// Additions keep the desired order.
pub fn diff_sources(live: &[String], desired: &[String]) -> (Vec<String>, Vec<String>) {
    let removed = live
        .iter()
        .filter(|s| !desired.contains(s))
        .cloned()
        .collect();
    let added = desired
        .iter()
        .filter(|s| !live.contains(s))
        .cloned()
        .collect();
    (added, removed)
}

pub struct MergeReconciler {
    mounts: Arc<MountReconciler>,
    table: Arc<dyn MountTable>,
    sources: Arc<dyn SourceControl>,
    registry: Arc<MergeRegistry>,
    events: Arc<dyn EventPublisher>,
    mount_options: String,
}

impl MergeReconciler {
    pub fn new(
        mounts: Arc<MountReconciler>,
        table: Arc<dyn MountTable>,
        sources: Arc<dyn SourceControl>,
        registry: Arc<MergeRegistry>,
        events: Arc<dyn EventPublisher>,
        mount_options: impl Into<String>,
    ) -> Self {
        Self {
            mounts,
            table,
            sources,
            registry,
            events,
            mount_options: mount_options.into(),
        }
    }

    pub fn classify(&self, merge: &Merge) -> Result<MergeState> {
        // The last record is the top of a mount stack.
        let top = self
            .table
            .get_mounts(&filters::by_mount_point(&merge.mount_point))?
            .pop();
        let adapter = self.mounts.adapter();
        Ok(match top {
            None => MergeState::Absent,
            Some(record)
                if adapter.canonical_fstype(&record.fstype)
                    == adapter.canonical_fstype(&merge.fstype) =>
            {
                MergeState::PresentMatching(record)
            }
            Some(record) => MergeState::PresentConflicting(record),
        })
    }

    pub fn reconcile(&self, merge: &Merge) -> Result<MergeOutcome> {
        match self.classify(merge)? {
            MergeState::Absent => self.create(merge),
            MergeState::PresentMatching(record) => self.update(merge, &record),
            MergeState::PresentConflicting(record) => {
                error!(
                    "Merge {} target {} is occupied by a {} mount from {}, leaving it untouched",
                    merge.id, merge.mount_point, record.fstype, record.source
                );
                Ok(MergeOutcome::Conflicting {
                    fstype: record.fstype,
                })
            }
        }
    }

    fn create(&self, merge: &Merge) -> Result<MergeOutcome> {
        let sources = merge.source_paths();
        paths::check_sources(&merge.mount_point, &sources)?;
        if sources.is_empty() {
            warn!("Merge {} at {} has no sources, not mounting", merge.id, merge.mount_point);
            return Ok(MergeOutcome::NoSources);
        }

        let request = MountRequest::new(
            join_sources(&sources),
            merge.mount_point.clone(),
            merge.fstype.clone(),
            self.mount_options.clone(),
        );
        let record = self.mounts.mount(request)?;

        info!(
            "Created merge {} at {} from {}",
            merge.id,
            merge.mount_point,
            join_sources(&sources)
        );
        let id = merge.id.to_string();
        let joined = join_sources(&sources);
        events::notify(
            self.events.as_ref(),
            MERGE_CREATED,
            &[
                ("id", id.as_str()),
                ("mount_point", merge.mount_point.as_str()),
                ("sources", joined.as_str()),
            ],
        );
        Ok(MergeOutcome::Created(record))
    }

    /// Live sources from the control channel, falling back to the record.
    fn live_sources(&self, merge: &Merge, record: &MountRecord) -> Result<Vec<String>> {
        match self.sources.get_sources(&merge.mount_point) {
            Ok(sources) => Ok(sources),
            Err(e) => {
                debug!(
                    "Reading sources of {} from the control file failed ({}), using the mount record",
                    merge.mount_point, e
                );
                self.mounts.adapter().source_mounts(record).ok_or_else(|| {
                    ServiceError::OperationFailed(format!(
                        "{} is not a union mount",
                        merge.mount_point
                    ))
                })
            }
        }
    }

    fn update(&self, merge: &Merge, record: &MountRecord) -> Result<MergeOutcome> {
        let desired = merge.source_paths();
        paths::check_sources(&merge.mount_point, &desired)?;
        if desired.is_empty() {
            warn!(
                "Merge {} at {} has no sources left, leaving the mounted branches alone",
                merge.id, merge.mount_point
            );
            return Ok(MergeOutcome::NoSources);
        }

        let _guard = self.mounts.claim(&merge.mount_point)?;
        let live = self.live_sources(merge, record)?;
        let (added, removed) = diff_sources(&live, &desired);
        if added.is_empty() && removed.is_empty() {
            debug!("Merge {} at {} is up to date", merge.id, merge.mount_point);
            return Ok(MergeOutcome::Unchanged);
        }

        for source in &removed {
            self.sources.remove_source(&merge.mount_point, source)?;
        }
        for source in &added {
            self.sources.add_source(&merge.mount_point, source)?;
        }

        info!(
            "Updated merge {} at {}: +{:?} -{:?}",
            merge.id, merge.mount_point, added, removed
        );
        let id = merge.id.to_string();
        let joined = join_sources(&desired);
        events::notify(
            self.events.as_ref(),
            MERGE_UPDATED,
            &[
                ("id", id.as_str()),
                ("mount_point", merge.mount_point.as_str()),
                ("sources", joined.as_str()),
            ],
        );
        Ok(MergeOutcome::Updated { added, removed })
    }

    /// One pass over every registered merge. A failing merge is logged and
    /// does not stop the others.
    pub fn reconcile_all(&self) -> Result<Vec<MergeReport>> {
        let merges = self.registry.list_merges()?;
        let reports = merges
            .iter()
            .map(|merge| {
                let result = self.reconcile(merge);
                if let Err(e) = &result {
                    error!(
                        "Failed to reconcile merge {} at {}: {}",
                        merge.id, merge.mount_point, e
                    );
                }
                MergeReport {
                    merge_id: merge.id,
                    mount_point: merge.mount_point.clone(),
                    result,
                }
            })
            .collect();
        Ok(reports)
    }
}
