// SPDX-License-Identifier: GPL-3.0-only

//! Persisted mount table entry

use serde::{Deserialize, Serialize};

/// One line of an fstab-compatible file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FstabEntry {
    /// Device, `UUID=`/`LABEL=` reference, or source list for union mounts
    pub source: String,
    pub mount_point: String,
    pub fstype: String,
    /// Comma-separated options, `defaults` when nothing else applies
    pub options: String,
    /// 0 or 1
    pub dump: u32,
    /// 0 = never checked, 1 = checked first, 2 = checked after
    pub pass: u32,
}

impl FstabEntry {
    pub fn new(
        source: impl Into<String>,
        mount_point: impl Into<String>,
        fstype: impl Into<String>,
        options: impl Into<String>,
        dump: u32,
        pass: u32,
    ) -> Self {
        Self {
            source: source.into(),
            mount_point: mount_point.into(),
            fstype: fstype.into(),
            options: options.into(),
            dump,
            pass,
        }
    }

    pub fn option_tokens(&self) -> impl Iterator<Item = &str> {
        self.options
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.option_tokens().any(|t| t == option)
    }
}
