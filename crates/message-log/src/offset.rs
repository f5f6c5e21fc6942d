use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Offset, OffsetKey, Result};

/// Persists the read position of a consumer on a partition.
///
/// Positions only move forward: [`OffsetStore::advance`] never lowers a
/// stored offset, so a late or replayed advance cannot rewind a consumer.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Loads the stored position, or None if the consumer has never read
    /// this partition.
    async fn load(&self, key: &OffsetKey) -> Result<Option<Offset>>;

    /// Stores `to` unless a later position is already stored.
    ///
    /// Returns the position stored after the call.
    async fn advance(&self, key: &OffsetKey, to: Offset) -> Result<Offset>;
}

/// Extension trait providing convenience methods for offset stores.
#[async_trait]
pub trait OffsetStoreExt: OffsetStore {
    /// Loads the stored position, defaulting to the beginning of the partition.
    async fn load_or_beginning(&self, key: &OffsetKey) -> Result<Offset> {
        Ok(self.load(key).await?.unwrap_or_else(Offset::beginning))
    }
}

impl<T: OffsetStore + ?Sized> OffsetStoreExt for T {}

#[async_trait]
impl<T: OffsetStore + ?Sized> OffsetStore for Arc<T> {
    async fn load(&self, key: &OffsetKey) -> Result<Option<Offset>> {
        (**self).load(key).await
    }

    async fn advance(&self, key: &OffsetKey, to: Offset) -> Result<Offset> {
        (**self).advance(key, to).await
    }
}

/// In-memory offset store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOffsetStore {
    offsets: Arc<RwLock<HashMap<OffsetKey, Offset>>>,
}

impl InMemoryOffsetStore {
    /// Creates a new empty offset store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored offsets.
    pub async fn len(&self) -> usize {
        self.offsets.read().await.len()
    }

    /// Returns true if no offset has been stored yet.
    pub async fn is_empty(&self) -> bool {
        self.offsets.read().await.is_empty()
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn load(&self, key: &OffsetKey) -> Result<Option<Offset>> {
        Ok(self.offsets.read().await.get(key).copied())
    }

    async fn advance(&self, key: &OffsetKey, to: Offset) -> Result<Offset> {
        let mut offsets = self.offsets.write().await;
        let stored = offsets.entry(key.clone()).or_insert(to);
        if to > *stored {
            *stored = to;
        }
        Ok(*stored)
    }
}
