// SPDX-License-Identifier: GPL-3.0-only

//! Storage reconciliation core
//!
//! Keeps the kernel mount table, the persisted fstab and the registry of
//! mergerfs unions consistent across restarts and external changes.
//! [`StorageService`] is the entry point; it is built from a [`Config`] and
//! the system [`Collaborators`], which tests replace with fakes.

pub mod busy;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod merge;
pub mod mount;
pub mod paths;
pub mod registry;
pub mod service;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{Result, ServiceError};
pub use merge::{MergeOutcome, MergeReconciler};
pub use mount::MountReconciler;
pub use registry::MergeRegistry;
pub use service::{Collaborators, StorageService, SweepReport};
