use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{LogRecord, Offset, OutgoingRecord, PartitionRef, Result};

/// A stream of records read from one partition.
///
/// The stream is live: once it has caught up with the partition it waits
/// for new appends instead of ending.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<LogRecord>> + Send>>;

/// Write side of the log: appends commands to named topics.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CommandLog: Send + Sync {
    /// Appends a record to `record.topic`.
    ///
    /// Returns the offset the record was written at. Failure to append is
    /// reported as [`MessageLogError::AppendFailed`](crate::MessageLogError::AppendFailed).
    async fn append(&self, record: OutgoingRecord) -> Result<Offset>;
}

/// Read side of the log: tails one partition from a given position.
#[async_trait]
pub trait ResponseLog: Send + Sync {
    /// Opens a stream over `partition` starting at `from` (inclusive).
    async fn read_from(&self, partition: &PartitionRef, from: Offset) -> Result<RecordStream>;
}

#[async_trait]
impl<T: CommandLog + ?Sized> CommandLog for Arc<T> {
    async fn append(&self, record: OutgoingRecord) -> Result<Offset> {
        (**self).append(record).await
    }
}

#[async_trait]
impl<T: ResponseLog + ?Sized> ResponseLog for Arc<T> {
    async fn read_from(&self, partition: &PartitionRef, from: Offset) -> Result<RecordStream> {
        (**self).read_from(partition, from).await
    }
}
