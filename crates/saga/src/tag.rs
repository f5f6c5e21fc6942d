//! Correlation tags linking a command to its receipt.

use std::sync::atomic::{AtomicU64, Ordering};

use common::{ItemId, PlayerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{LegDomain, Operation};

/// Identifies one leg's command and the receipt answering it.
///
/// Formatted as `{player}.{item}.{domain}-{operation}.{nonce}`. The nonce
/// makes tags unique across concurrent sagas of the same player and item,
/// and across coordinator instances sharing a response partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationTag(String);

impl CorrelationTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Mints unique [`CorrelationTag`]s for one coordinator instance.
#[derive(Debug)]
pub struct TagGenerator {
    instance: String,
    counter: AtomicU64,
}

impl TagGenerator {
    /// Creates a generator with a random instance id.
    pub fn new() -> Self {
        Self::with_instance(Uuid::new_v4().simple().to_string())
    }

    /// Creates a generator with a fixed instance id.
    pub fn with_instance(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn next(
        &self,
        player_id: &PlayerId,
        item_id: &ItemId,
        domain: LegDomain,
        operation: Operation,
    ) -> CorrelationTag {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        CorrelationTag(format!(
            "{player_id}.{item_id}.{domain}-{operation}.{}-{n}",
            self.instance
        ))
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new()
    }
}
