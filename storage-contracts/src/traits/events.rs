// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use crate::StorageError;

/// Notification sink for structural changes.
///
/// Publishing is informational: callers log failures and carry on.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, name: &str, properties: &BTreeMap<String, String>)
    -> Result<(), StorageError>;
}
