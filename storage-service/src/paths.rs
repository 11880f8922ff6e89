// SPDX-License-Identifier: GPL-3.0-only

//! Path overlap checks for merge sources
//!
//! Union sources must not sit above or below their own target, otherwise the
//! union would mount into itself.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ServiceError};

/// Lexical normalization: drops `.` components, resolves `..` and trailing
/// separators. The filesystem is not consulted.
pub fn normalize(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `a` and `b` are the same path or one contains the other.
pub fn overlaps(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    a.starts_with(&b) || b.starts_with(&a)
}

/// Reject the first source that overlaps `mount_point`.
pub fn check_sources<S: AsRef<str>>(mount_point: &str, sources: &[S]) -> Result<()> {
    for source in sources {
        let source = source.as_ref();
        if overlaps(mount_point, source) {
            return Err(ServiceError::SourceConflict {
                mount_point: mount_point.to_string(),
                source_path: source.to_string(),
            });
        }
    }
    Ok(())
}

/// Number of components, used to order nested mounts deepest first.
pub fn depth(path: &str) -> usize {
    normalize(path).components().count()
}
