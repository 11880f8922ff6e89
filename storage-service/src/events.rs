// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use storage_contracts::{EventPublisher, StorageError};

pub const VOLUME_MOUNTED: &str = "volume_mounted";
pub const VOLUME_UNMOUNTED: &str = "volume_unmounted";
pub const MERGE_CREATED: &str = "merge_created";
pub const MERGE_UPDATED: &str = "merge_updated";

/// Default publisher: events go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(
        &self,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), StorageError> {
        tracing::info!(event = name, ?properties, "Storage event");
        Ok(())
    }
}

/// Publish and log failures; notification never fails the caller.
pub fn notify(publisher: &dyn EventPublisher, name: &str, properties: &[(&str, &str)]) {
    let properties: BTreeMap<String, String> = properties
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Err(e) = publisher.publish(name, &properties) {
        tracing::warn!("Failed to publish {} event: {}", name, e);
    }
}
