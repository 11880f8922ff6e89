// SPDX-License-Identifier: GPL-3.0-only

//! Backup and write-to-temp-then-rename helpers
//!
//! Readers of a file replaced through these helpers observe either the old
//! or the new contents, never a truncated file.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;

pub const BACKUP_SUFFIX: &str = ".bak";

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy `path` to its backup location. Returns `None` when there is nothing to back up.
pub fn backup_file(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let backup = backup_path(path);
    fs::copy(path, &backup)?;
    debug!("Backed up {:?} to {:?}", path, backup);
    Ok(Some(backup))
}

/// Create a temporary file next to `path` so the final rename stays on one filesystem.
fn temp_sibling(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    Ok(NamedTempFile::new_in(dir)?)
}

/// Build the replacement through `fill`, then rename it over `path`.
///
/// The original's permissions are carried over when it exists.
pub fn replace_with<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> Result<()>,
{
    let mut temp = temp_sibling(path)?;
    fill(&mut temp)?;
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;

    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    replace_with(path, |temp| {
        temp.write_all(contents)?;
        Ok(())
    })
}
