// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for storage management
//!
//! This crate provides the direct system interfaces the reconciliation
//! service builds on:
//! - Persisted mount table (fstab) reading and atomic editing
//! - Kernel mount table queries via `/proc/self/mountinfo`
//! - External command execution for `mount`/`umount`/`lsblk`
//! - Union filesystem (mergerfs) mount rewriting and live source control
//!
//! Mutating operations require elevated privileges and should only be called
//! from the privileged service.

pub mod atomic;
pub mod block;
pub mod cache;
pub mod command;
pub mod error;
pub mod fstab;
pub mod mountinfo;
pub mod options;
pub mod union;
pub mod xattr_control;

pub use block::BlockDeviceLister;
pub use cache::TtlCache;
pub use command::SystemCommandRunner;
pub use error::{Result, SysError};
pub use fstab::FstabStore;
pub use mountinfo::ProcMountTable;
pub use union::UnionMountAdapter;
pub use xattr_control::XattrSourceControl;
