// SPDX-License-Identifier: GPL-3.0-only

//! Live mount table records and mount requests

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Short union filesystem tag, as users write it
pub const UNION_FS_SHORT: &str = "mergerfs";

/// Canonical union filesystem tag, as the kernel reports it
pub const UNION_FS_LONG: &str = "fuse.mergerfs";

/// Extended record field holding the raw union source list
pub const SRCMOUNTS_KEY: &str = "mergerfs.srcmounts";

const SOURCE_SEPARATOR: char = ':';

pub fn is_union_fstype(fstype: &str) -> bool {
    fstype == UNION_FS_SHORT || fstype == UNION_FS_LONG
}

/// Join union sources into the `a:b:c` form, preserving order.
pub fn join_sources<S: AsRef<str>>(sources: &[S]) -> String {
    sources
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&SOURCE_SEPARATOR.to_string())
}

/// Split an `a:b:c` union source list, dropping empty segments.
pub fn split_sources(raw: &str) -> Vec<String> {
    raw.split(SOURCE_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// One entry of the kernel mount table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    /// Kernel mount ID
    pub id: u32,
    pub parent_id: u32,
    pub mount_point: String,
    pub source: String,
    pub fstype: String,
    /// Per-mount options
    pub options: String,
    /// Superblock options
    pub super_options: String,
    /// Adapter-provided metadata (e.g. `mergerfs.srcmounts`)
    #[serde(default)]
    pub extended: BTreeMap<String, String>,
}

/// A generic mount description handed to the mount reconciler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub source: String,
    pub mount_point: String,
    pub fstype: String,
    /// Comma-separated options; empty means none
    pub options: String,
    /// Record the mount in the persisted mount table
    #[serde(default)]
    pub persist: bool,
}

impl MountRequest {
    pub fn new(
        source: impl Into<String>,
        mount_point: impl Into<String>,
        fstype: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            mount_point: mount_point.into(),
            fstype: fstype.into(),
            options: options.into(),
            persist: false,
        }
    }

    pub fn persistent(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn option_tokens(&self) -> Vec<String> {
        self.options
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
}

/// Result of applying a mount table filter to one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterDecision {
    /// Leave this record out of the result
    pub skip: bool,
    /// End the scan after this record
    pub stop: bool,
}

impl FilterDecision {
    pub const KEEP: Self = Self {
        skip: false,
        stop: false,
    };
    pub const SKIP: Self = Self {
        skip: true,
        stop: false,
    };
    pub const KEEP_AND_STOP: Self = Self {
        skip: false,
        stop: true,
    };
}
