//! Coordinator configuration.

use std::time::Duration;

use message_log::{OffsetKey, PartitionRef};

use crate::model::LegDomain;
use crate::topics;

/// Settings fixed for the lifetime of a coordinator.
///
/// Built once at startup and passed to
/// [`SagaCoordinator::new`](crate::SagaCoordinator::new).
#[derive(Debug, Clone, PartialEq)]
pub struct SagaConfig {
    /// Consumer name under which response offsets are stored.
    pub consumer: String,
    pub player_topic: String,
    pub inventory_topic: String,
    /// Partition the wallet and inventory services answer on.
    pub response_partition: PartitionRef,
    /// Bound on a catalog lookup.
    pub catalog_timeout: Duration,
    /// Bound on a single log append.
    pub publish_timeout: Duration,
    /// Bound on waiting for one leg's receipt.
    pub response_timeout: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            consumer: topics::PAYMENT_CONSUMER.to_string(),
            player_topic: topics::PLAYER_TOPIC.to_string(),
            inventory_topic: topics::INVENTORY_TOPIC.to_string(),
            response_partition: PartitionRef::new(topics::PAYMENT_TOPIC, 0),
            catalog_timeout: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
        }
    }
}

impl SagaConfig {
    /// Command topic for legs of `domain`.
    pub fn topic_for(&self, domain: LegDomain) -> &str {
        match domain {
            LegDomain::Wallet => &self.player_topic,
            LegDomain::Inventory => &self.inventory_topic,
        }
    }

    /// Key under which the response read position is stored.
    pub fn offset_key(&self) -> OffsetKey {
        OffsetKey::new(self.consumer.clone(), self.response_partition.clone())
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_catalog_timeout(mut self, timeout: Duration) -> Self {
        self.catalog_timeout = timeout;
        self
    }
}
