//! Durable append-only message log used by the payment saga.
//!
//! The saga coordinator talks to the wallet and inventory services only
//! through this log: commands are appended to per-domain topics, and
//! receipts are read back from a response partition starting at a
//! consumer-managed offset.
//!
//! - [`CommandLog`] appends records to a named topic
//! - [`ResponseLog`] tails a single partition from a given [`Offset`]
//! - [`OffsetStore`] persists the last-consumed position per consumer/partition
//!
//! [`InMemoryMessageLog`] and [`InMemoryOffsetStore`] back tests and local
//! development, [`PostgresOffsetStore`] persists offsets in PostgreSQL, and
//! `KafkaMessageLog` (behind the `kafka` feature) talks to a Kafka-compatible
//! broker.

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod log;
pub mod memory;
pub mod offset;
pub mod postgres;
pub mod record;

pub use error::{MessageLogError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaMessageLog, KafkaMessageLogBuilder};
pub use log::{CommandLog, RecordStream, ResponseLog};
pub use memory::InMemoryMessageLog;
pub use offset::{InMemoryOffsetStore, OffsetStore, OffsetStoreExt};
pub use postgres::PostgresOffsetStore;
pub use record::{CORRELATION_TAG_HEADER, LogRecord, Offset, OffsetKey, OutgoingRecord, PartitionRef};
