// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for local storage management
//!
//! This crate defines the single source of truth for the storage domain types
//! shared by every layer of the stack:
//!
//! - **storage-sys**: parses the kernel mount table and the fstab file into these types
//! - **storage-service**: persists volumes and merges, and reconciles them against the kernel
//!
//! ## Sources of truth
//!
//! - `MountRecord` → live kernel mount table (read-only, never persisted)
//! - `FstabEntry` → persisted mount table file
//! - `Volume` / `Merge` → application registry (desired state)

pub mod disk;
pub mod fstab;
pub mod merge;
pub mod mount;
pub mod volume;

pub use disk::BlockDevice;
pub use fstab::FstabEntry;
pub use merge::{Merge, MergeDefinition};
pub use mount::{
    FilterDecision, MountRecord, MountRequest, SRCMOUNTS_KEY, UNION_FS_LONG, UNION_FS_SHORT,
    is_union_fstype, join_sources, split_sources,
};
pub use volume::{Volume, VolumeState};
