// SPDX-License-Identifier: GPL-3.0-only

//! Union filesystem (mergerfs) mount adapter
//!
//! Every hook is a passthrough for mounts whose filesystem type is not the
//! union filesystem, so the adapter composes with ordinary mounts.

use storage_types::{
    MountRecord, MountRequest, SRCMOUNTS_KEY, UNION_FS_LONG, is_union_fstype, split_sources,
};
use tracing::debug;

use crate::options::{join_options, set_prefixed_if_absent, split_options};

const FSNAME_PREFIX: &str = "fsname=";

#[derive(Debug, Clone, Copy, Default)]
pub struct UnionMountAdapter;

impl UnionMountAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn applies_to(&self, fstype: &str) -> bool {
        is_union_fstype(fstype)
    }

    /// Canonical form used for comparisons against kernel records.
    pub fn canonical_fstype(&self, fstype: &str) -> String {
        if self.applies_to(fstype) {
            UNION_FS_LONG.to_string()
        } else {
            fstype.to_string()
        }
    }

    /// Rewrite the filesystem tag to the long form and make the mount
    /// self-descriptive with `fsname=<source>`.
    pub fn pre_mount(&self, mut request: MountRequest) -> MountRequest {
        if !self.applies_to(&request.fstype) {
            return request;
        }

        request.fstype = UNION_FS_LONG.to_string();
        let tokens = set_prefixed_if_absent(
            split_options(&request.options),
            FSNAME_PREFIX,
            &request.source,
        );
        request.options = join_options(&tokens);
        debug!(
            "Rewrote union mount at {}: -t {} -o {}",
            request.mount_point, request.fstype, request.options
        );
        request
    }

    /// Record the raw source list on the post-mount record.
    pub fn post_mount(&self, request: &MountRequest, mut record: MountRecord) -> MountRecord {
        if self.applies_to(&record.fstype) {
            record
                .extended
                .insert(SRCMOUNTS_KEY.to_string(), request.source.clone());
        }
        record
    }

    /// Source list of a union record: the extended field when present,
    /// otherwise the record's source.
    pub fn source_mounts(&self, record: &MountRecord) -> Option<Vec<String>> {
        if !self.applies_to(&record.fstype) {
            return None;
        }
        let raw = record
            .extended
            .get(SRCMOUNTS_KEY)
            .map(String::as_str)
            .unwrap_or(&record.source);
        Some(split_sources(raw))
    }
}
