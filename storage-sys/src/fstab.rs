// SPDX-License-Identifier: GPL-3.0-only

//! Persisted mount table (fstab) store
//!
//! Every mutation backs the file up first. Removals stream the file into a
//! sibling temporary file and rename it over the original; additions append
//! a single line. Concurrent writers must be serialized by the caller.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use storage_types::FstabEntry;
use tracing::{debug, info};

use crate::atomic;
use crate::error::{Result, SysError};

const MIN_FIELDS: usize = 4;
const MAX_FIELDS: usize = 6;

/// Default comment written above entries this service appends
pub const DEFAULT_ENTRY_COMMENT: &str = "Added by local-storage";

fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ' ' => out.push_str("\\040"),
            '\t' => out.push_str("\\011"),
            '\n' => out.push_str("\\012"),
            '\\' => out.push_str("\\134"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode `\NNN` octal escapes; anything else is kept verbatim.
pub fn unescape_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            if let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8) {
                output.push(num);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

fn parse_number(field: &str, name: &str, line: usize) -> Result<u32> {
    field.parse().map_err(|_| SysError::InvalidEntry {
        line,
        reason: format!("{name} field {field:?} is not an integer"),
    })
}

/// Parse one fstab line. Blank lines and `#` comments yield `None`.
pub fn parse_line(raw: &str, line: usize) -> Result<Option<FstabEntry>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() < MIN_FIELDS || fields.len() > MAX_FIELDS {
        return Err(SysError::InvalidEntry {
            line,
            reason: format!(
                "expected {MIN_FIELDS} to {MAX_FIELDS} fields, found {}",
                fields.len()
            ),
        });
    }

    let dump = match fields.get(4) {
        Some(field) => parse_number(field, "dump", line)?,
        None => 0,
    };
    let pass = match fields.get(5) {
        Some(field) => parse_number(field, "pass", line)?,
        None => 0,
    };

    Ok(Some(FstabEntry {
        source: unescape_field(fields[0]),
        mount_point: unescape_field(fields[1]),
        fstype: unescape_field(fields[2]),
        options: unescape_field(fields[3]),
        dump,
        pass,
    }))
}

/// Serialize an entry as a six-field tab-delimited line (no trailing newline).
pub fn serialize_entry(entry: &FstabEntry) -> String {
    let options = if entry.options.trim().is_empty() {
        "defaults".to_string()
    } else {
        escape_field(&entry.options)
    };
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        escape_field(&entry.source),
        escape_field(&entry.mount_point),
        escape_field(&entry.fstype),
        options,
        entry.dump,
        entry.pass
    )
}

pub fn parse_entries(input: &str) -> Result<Vec<FstabEntry>> {
    let mut entries = Vec::new();
    for (index, line) in input.lines().enumerate() {
        if let Some(entry) = parse_line(line, index + 1)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Line-oriented fstab file with backup-then-atomic-replace editing
#[derive(Debug, Clone)]
pub struct FstabStore {
    path: PathBuf,
}

impl FstabStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries in file order. A missing file has no entries.
    pub fn get_entries(&self) -> Result<Vec<FstabEntry>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => parse_entries(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_entry_by_mount_point(&self, mount_point: &str) -> Result<Option<FstabEntry>> {
        Ok(self
            .get_entries()?
            .into_iter()
            .find(|entry| entry.mount_point == mount_point))
    }

    /// Append `entry` with the default identifying comment.
    pub fn add(&self, entry: &FstabEntry, replace: bool) -> Result<()> {
        self.add_with_comment(entry, replace, Some(DEFAULT_ENTRY_COMMENT))
    }

    /// Append `entry`, optionally preceded by a `# comment` line.
    ///
    /// An identical entry at the mount point is left alone. A different one
    /// is a [`SysError::Conflict`] unless `replace` is set, in which case the
    /// old line is removed first.
    pub fn add_with_comment(
        &self,
        entry: &FstabEntry,
        replace: bool,
        comment: Option<&str>,
    ) -> Result<()> {
        if let Some(existing) = self.get_entry_by_mount_point(&entry.mount_point)? {
            if existing == *entry {
                debug!("fstab already holds {:?}, nothing to add", entry.mount_point);
                return Ok(());
            }
            if !replace {
                return Err(SysError::Conflict {
                    mount_point: entry.mount_point.clone(),
                    existing: Box::new(existing),
                });
            }
            atomic::backup_file(&self.path)?;
            self.rewrite_without(&entry.mount_point, false)?;
        } else {
            atomic::backup_file(&self.path)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)?;

        let mut block = String::new();
        if !ends_with_newline(&mut file)? {
            block.push('\n');
        }
        if let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) {
            block.push_str("# ");
            block.push_str(comment);
            block.push('\n');
        }
        block.push_str(&serialize_entry(entry));
        block.push('\n');

        file.write_all(block.as_bytes())?;
        file.sync_all()?;

        info!("Added fstab entry for {}", entry.mount_point);
        Ok(())
    }

    /// Drop (or comment out) every line for `mount_point`. No-op when absent.
    ///
    /// Lines this store cannot parse are carried over verbatim.
    pub fn remove_by_mount_point(&self, mount_point: &str, comment_out: bool) -> Result<()> {
        if self.get_entry_by_mount_point(mount_point)?.is_none() {
            debug!("No fstab entry for {}, nothing to remove", mount_point);
            return Ok(());
        }

        atomic::backup_file(&self.path)?;
        self.rewrite_without(mount_point, comment_out)?;

        info!("Removed fstab entry for {}", mount_point);
        Ok(())
    }

    fn rewrite_without(&self, mount_point: &str, comment_out: bool) -> Result<()> {
        let source = fs::File::open(&self.path)?;
        atomic::replace_with(&self.path, |temp| {
            for (index, line) in BufReader::new(source).lines().enumerate() {
                let line = line?;
                let matches = matches!(
                    parse_line(&line, index + 1),
                    Ok(Some(entry)) if entry.mount_point == mount_point
                );

                if !matches {
                    writeln!(temp, "{line}")?;
                } else if comment_out {
                    writeln!(temp, "# {line}")?;
                }
            }
            Ok(())
        })
    }
}

fn ends_with_newline(file: &mut fs::File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# /etc/fstab: static file system information.\n\
UUID=0a1b2c3d\t/\text4\terrors=remount-ro\t0\t1\n\
\n\
LABEL=UEFI /boot/efi vfat umask=0077 0 1\n\
/mnt/sdb:/mnt/sdc\t/media\tmergerfs\tdefaults,allow_other,category.create=mfs\t0\t0\n";

    fn store_with(content: &str) -> (tempfile::TempDir, FstabStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        fs::write(&path, content).unwrap();
        (dir, FstabStore::new(path))
    }

    #[test]
    fn reads_boot_and_union_entries() {
        let (_dir, store) = store_with(SAMPLE);

        let entries = store.get_entries().unwrap();
        assert_eq!(entries.len(), 3);

        let media = store.get_entry_by_mount_point("/media").unwrap().unwrap();
        assert_eq!(media.source, "/mnt/sdb:/mnt/sdc");
        assert_eq!(media.fstype, "mergerfs");
        assert!(media.has_option("allow_other"));
        assert_eq!(media.dump, 0);
        assert_eq!(media.pass, 0);

        let efi = store.get_entry_by_mount_point("/boot/efi").unwrap().unwrap();
        assert_eq!(efi.source, "LABEL=UEFI");
        assert_eq!(efi.options, "umask=0077");
        assert_eq!(efi.pass, 1);

        assert!(store.get_entry_by_mount_point("/boot").unwrap().is_none());
    }

    #[test]
    fn missing_dump_and_pass_default_to_zero() {
        let entry = parse_line("/dev/sdb1 /mnt/sdb ext4 defaults", 1)
            .unwrap()
            .unwrap();
        assert_eq!((entry.dump, entry.pass), (0, 0));
    }

    #[test]
    fn field_count_out_of_range_is_invalid() {
        for line in ["/dev/sdb1 /mnt/sdb ext4", "a b c d 0 0 extra"] {
            let err = parse_line(line, 3).unwrap_err();
            assert!(matches!(err, SysError::InvalidEntry { line: 3, .. }), "{line}");
        }
    }

    #[test]
    fn non_numeric_pass_aborts_the_read() {
        let (_dir, store) = store_with("/dev/sdb1 /mnt/sdb ext4 defaults 0 x\n/dev/sdc1 /mnt/sdc ext4 defaults 0 0\n");
        let err = store.get_entries().unwrap_err();
        assert!(matches!(err, SysError::InvalidEntry { line: 1, .. }));
    }

    #[test]
    fn serialized_line_parses_back_including_escaped_spaces() {
        let entry = FstabEntry::new("/dev/sdb1", "/mnt/My Disk", "ext4", "defaults,noatime", 1, 2);
        let line = serialize_entry(&entry);
        assert_eq!(line.split('\t').count(), 6);
        assert!(line.contains("/mnt/My\\040Disk"));
        assert_eq!(parse_line(&line, 1).unwrap(), Some(entry));
    }

    #[test]
    fn remove_keeps_other_entries_in_order_and_backs_up() {
        let (dir, store) = store_with(SAMPLE);

        store.remove_by_mount_point("/boot/efi", false).unwrap();

        assert!(store.get_entry_by_mount_point("/boot/efi").unwrap().is_none());
        let remaining: Vec<String> = store
            .get_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.mount_point)
            .collect();
        assert_eq!(remaining, vec!["/", "/media"]);

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with("# /etc/fstab"));
        assert_eq!(
            fs::read_to_string(dir.path().join("fstab.bak")).unwrap(),
            SAMPLE
        );
    }

    #[test]
    fn remove_can_comment_the_line_out() {
        let (_dir, store) = store_with(SAMPLE);

        store.remove_by_mount_point("/media", true).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("# /mnt/sdb:/mnt/sdc\t/media"));
        assert!(store.get_entry_by_mount_point("/media").unwrap().is_none());
    }

    #[test]
    fn remove_of_absent_mount_point_is_a_no_op() {
        let (dir, store) = store_with(SAMPLE);
        store.remove_by_mount_point("/nowhere", false).unwrap();
        assert_eq!(fs::read_to_string(store.path()).unwrap(), SAMPLE);
        assert!(!dir.path().join("fstab.bak").exists());
    }

    #[test]
    fn add_appends_with_comment() {
        let (_dir, store) = store_with("UUID=0a1b2c3d / ext4 defaults 0 1");
        let entry = FstabEntry::new("UUID=feed", "/mnt/sdd", "xfs", "defaults", 0, 2);

        store.add(&entry, false).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains(&format!("\n# {DEFAULT_ENTRY_COMMENT}\nUUID=feed\t")));
        assert_eq!(store.get_entries().unwrap().len(), 2);
        assert_eq!(store.get_entry_by_mount_point("/mnt/sdd").unwrap(), Some(entry));
    }

    #[test]
    fn add_conflicting_entry_without_replace_leaves_file_unmodified() {
        let (_dir, store) = store_with(SAMPLE);
        let entry = FstabEntry::new("/mnt/sdx", "/media", "mergerfs", "defaults", 0, 0);

        let err = store.add(&entry, false).unwrap_err();

        assert!(matches!(err, SysError::Conflict { ref mount_point, .. } if mount_point == "/media"));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), SAMPLE);
    }

    #[test]
    fn add_with_replace_supersedes_the_old_line() {
        let (_dir, store) = store_with(SAMPLE);
        let entry = FstabEntry::new("/mnt/sdx", "/media", "mergerfs", "defaults", 0, 0);

        store.add_with_comment(&entry, true, None).unwrap();

        let media: Vec<FstabEntry> = store
            .get_entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.mount_point == "/media")
            .collect();
        assert_eq!(media, vec![entry]);
    }

    #[test]
    fn adding_an_identical_entry_is_idempotent() {
        let (_dir, store) = store_with(SAMPLE);
        let existing = store.get_entry_by_mount_point("/media").unwrap().unwrap();

        store.add(&existing, false).unwrap();

        assert_eq!(fs::read_to_string(store.path()).unwrap(), SAMPLE);
    }

    #[test]
    fn add_creates_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FstabStore::new(dir.path().join("fstab"));
        let entry = FstabEntry::new("/dev/sde1", "/mnt/sde", "ext4", "", 0, 0);

        store.add_with_comment(&entry, false, None).unwrap();

        let stored = store.get_entry_by_mount_point("/mnt/sde").unwrap().unwrap();
        assert_eq!(stored.options, "defaults");
    }
}
