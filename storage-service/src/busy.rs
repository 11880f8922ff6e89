// SPDX-License-Identifier: GPL-3.0-only

//! In-flight mount point tracking
//!
//! A mount point is claimed for the whole duration of a mount or unmount.
//! Contenders are rejected with `Busy` instead of waiting.

use dashmap::DashSet;

use crate::error::{Result, ServiceError};

#[derive(Debug, Default)]
pub struct BusySet {
    paths: DashSet<String>,
}

impl BusySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `mount_point` until the returned guard is dropped.
    pub fn try_acquire(&self, mount_point: &str) -> Result<BusyGuard<'_>> {
        if !self.paths.insert(mount_point.to_string()) {
            tracing::warn!("Rejecting operation on busy mount point {}", mount_point);
            return Err(ServiceError::Busy(mount_point.to_string()));
        }
        Ok(BusyGuard {
            set: self,
            mount_point: mount_point.to_string(),
        })
    }

    pub fn is_busy(&self, mount_point: &str) -> bool {
        self.paths.contains(mount_point)
    }
}

#[derive(Debug)]
pub struct BusyGuard<'a> {
    set: &'a BusySet,
    mount_point: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.set.paths.remove(&self.mount_point);
    }
}
