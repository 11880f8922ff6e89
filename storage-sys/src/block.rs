// SPDX-License-Identifier: GPL-3.0-only

//! Block device enumeration through `lsblk`

use std::sync::Arc;

use serde::Deserialize;
use storage_contracts::CommandRunner;
use storage_types::BlockDevice;
use tracing::debug;

use crate::cache::TtlCache;
use crate::error::{Result, SysError};

const LSBLK: &str = "lsblk";
const LSBLK_COLUMNS: &str = "NAME,UUID,FSTYPE,MOUNTPOINT,TYPE";
const ALL_DEVICES: &str = "all";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

/// Flattened device list from `lsblk --json` output.
pub fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| SysError::OperationFailed(format!("Failed to parse lsblk output: {e}")))?;
    Ok(output
        .blockdevices
        .iter()
        .flat_map(BlockDevice::flatten)
        .collect())
}

pub struct BlockDeviceLister {
    runner: Arc<dyn CommandRunner>,
    cache: TtlCache<String, Vec<BlockDevice>>,
}

impl BlockDeviceLister {
    pub fn new(runner: Arc<dyn CommandRunner>, cache: TtlCache<String, Vec<BlockDevice>>) -> Self {
        Self { runner, cache }
    }

    fn query(&self) -> Result<Vec<BlockDevice>> {
        let args: Vec<String> = ["--json", "--paths", "--output", LSBLK_COLUMNS]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = self
            .runner
            .run_checked(LSBLK, &args)
            .map_err(|e| SysError::ExternalToolFailure {
                command: LSBLK.to_string(),
                stderr: e.message,
            })?;
        let devices = parse_lsblk(&output.stdout)?;
        debug!("lsblk reported {} device(s)", devices.len());
        Ok(devices)
    }

    /// All devices, served from the cache while it is fresh.
    pub fn list(&self) -> Result<Vec<BlockDevice>> {
        self.cache
            .get_or_try_insert_with(ALL_DEVICES.to_string(), || self.query())
    }

    pub fn find(&self, device_path: &str) -> Result<Option<BlockDevice>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|device| device.name == device_path))
    }

    /// Drop the cached listing, e.g. after a hot-plug.
    pub fn invalidate(&self) {
        self.cache.invalidate(&ALL_DEVICES.to_string());
    }
}
