// SPDX-License-Identifier: GPL-3.0-only

//! Kernel mount table reader backed by `/proc/self/mountinfo`

use std::fs;
use std::path::PathBuf;

use storage_contracts::{MountTable, StorageError};
use storage_types::{FilterDecision, MountRecord};
use tracing::debug;

use crate::error::{Result, SysError};
use crate::fstab::unescape_field;

const DEFAULT_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Parse one mountinfo line:
///
/// `36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue`
pub fn parse_mountinfo_line(line: &str) -> Result<MountRecord> {
    let invalid = || SysError::InvalidMountInfoLine(line.to_string());

    let (left, right) = line.split_once(" - ").ok_or_else(invalid)?;

    let left_fields: Vec<&str> = left.split_whitespace().collect();
    if left_fields.len() < 6 {
        return Err(invalid());
    }
    let id = left_fields[0].parse().map_err(|_| invalid())?;
    let parent_id = left_fields[1].parse().map_err(|_| invalid())?;

    let mut right_fields = right.split_whitespace();
    let fstype = right_fields.next().ok_or_else(invalid)?;
    let source = right_fields.next().unwrap_or_default();
    let super_options = right_fields.next().unwrap_or_default();

    Ok(MountRecord {
        id,
        parent_id,
        mount_point: unescape_field(left_fields[4]),
        source: unescape_field(source),
        fstype: unescape_field(fstype),
        options: left_fields[5].to_string(),
        super_options: super_options.to_string(),
        extended: Default::default(),
    })
}

/// Apply `filter` over the mountinfo text, honouring skip and stop.
pub fn parse_mountinfo(
    input: &str,
    filter: &dyn Fn(&MountRecord) -> FilterDecision,
) -> Result<Vec<MountRecord>> {
    let mut records = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let record = parse_mountinfo_line(line)?;
        let decision = filter(&record);
        if !decision.skip {
            records.push(record);
        }
        if decision.stop {
            break;
        }
    }

    Ok(records)
}

/// Live mount table. Reads the kernel table on every call.
#[derive(Debug, Clone)]
pub struct ProcMountTable {
    path: PathBuf,
}

impl ProcMountTable {
    pub fn new() -> Self {
        Self::with_path(DEFAULT_MOUNTINFO)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self, filter: &dyn Fn(&MountRecord) -> FilterDecision) -> Result<Vec<MountRecord>> {
        let content = fs::read_to_string(&self.path)?;
        let records = parse_mountinfo(&content, filter)?;
        debug!("Read {} mount record(s) from {:?}", records.len(), self.path);
        Ok(records)
    }
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for ProcMountTable {
    fn get_mounts(
        &self,
        filter: &dyn Fn(&MountRecord) -> FilterDecision,
    ) -> std::result::Result<Vec<MountRecord>, StorageError> {
        self.read(filter).map_err(StorageError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_contracts::filters;

    const SAMPLE: &str = "22 1 8:2 / / rw,relatime shared:1 - ext4 /dev/sda2 rw,errors=remount-ro\n\
37 22 0:5 / /proc rw,nosuid,nodev,noexec,relatime shared:13 - proc proc rw\n\
61 22 8:17 / /mnt/sdb rw,relatime shared:30 - ext4 /dev/sdb1 rw\n\
62 22 8:33 / /mnt/My\\040Disk rw,relatime shared:31 - xfs /dev/sdc1 rw\n\
75 22 0:52 / /mnt/merge rw,relatime shared:40 - fuse.mergerfs /mnt/sda:/mnt/sdb rw,user_id=0,group_id=0,allow_other\n";

    #[test]
    fn parses_fields_and_unescapes_paths() {
        let records = parse_mountinfo(SAMPLE, &|_| FilterDecision::KEEP).unwrap();
        assert_eq!(records.len(), 5);

        let disk = &records[3];
        assert_eq!(disk.id, 62);
        assert_eq!(disk.parent_id, 22);
        assert_eq!(disk.mount_point, "/mnt/My Disk");
        assert_eq!(disk.fstype, "xfs");
        assert_eq!(disk.source, "/dev/sdc1");
        assert_eq!(disk.options, "rw,relatime");

        let merge = &records[4];
        assert_eq!(merge.fstype, "fuse.mergerfs");
        assert_eq!(merge.source, "/mnt/sda:/mnt/sdb");
        assert!(merge.super_options.contains("allow_other"));
    }

    #[test]
    fn stop_ends_the_scan_after_the_hit() {
        let seen = std::cell::Cell::new(0);
        let records = parse_mountinfo(SAMPLE, &|record| {
            seen.set(seen.get() + 1);
            filters::by_id(37)(record)
        })
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mount_point, "/proc");
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn malformed_line_is_an_error_not_a_partial_result() {
        let input = format!("{SAMPLE}garbage without separator\n");
        let err = parse_mountinfo(&input, &|_| FilterDecision::KEEP).unwrap_err();
        assert!(matches!(err, SysError::InvalidMountInfoLine(_)));
    }

    #[test]
    fn reads_from_a_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mountinfo");
        fs::write(&path, SAMPLE).unwrap();

        let table = ProcMountTable::with_path(&path);
        let records = table.get_mounts(&filters::by_mount_point("/mnt/sdb")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "/dev/sdb1");
    }
}
