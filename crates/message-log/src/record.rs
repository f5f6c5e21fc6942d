use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Header carrying the correlation tag of a command and of its response.
pub const CORRELATION_TAG_HEADER: &str = "correlation-tag";

/// Position within a log partition.
///
/// A stored offset always names the *next* record to read, so a fresh
/// consumer starts at [`Offset::beginning`] and a consumer that has handled
/// the record at position `n` resumes from `n + 1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(i64);

impl Offset {
    /// Creates an offset from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the first position of a partition.
    pub fn beginning() -> Self {
        Self(0)
    }

    /// Returns the position right after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw offset value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Offset {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Offset> for i64 {
    fn from(offset: Offset) -> Self {
        offset.0
    }
}

/// A single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionRef {
    pub topic: String,
    pub partition: i32,
}

impl PartitionRef {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for PartitionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// Identifies one persisted read offset: a consumer reading one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OffsetKey {
    /// Name of the consuming service instance (e.g. "payment").
    pub consumer: String,
    pub partition: PartitionRef,
}

impl OffsetKey {
    pub fn new(consumer: impl Into<String>, partition: PartitionRef) -> Self {
        Self {
            consumer: consumer.into(),
            partition,
        }
    }
}

impl std::fmt::Display for OffsetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.consumer, self.partition)
    }
}

/// A record waiting to be appended to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRecord {
    /// Destination topic (e.g. "player", "inventory").
    pub topic: String,
    /// Record key; the operation key ("buy", "sell", "rtransaction", ...).
    pub key: String,
    /// Correlation tag carried in the [`CORRELATION_TAG_HEADER`] header.
    pub correlation_tag: Option<String>,
    /// JSON-encoded record value.
    pub payload: Vec<u8>,
}

impl OutgoingRecord {
    /// Creates a record whose value is the JSON encoding of `payload`.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: topic.into(),
            key: key.into(),
            correlation_tag: None,
            payload: serde_json::to_vec(payload)?,
        })
    }

    /// Attaches a correlation tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.correlation_tag = Some(tag.into());
        self
    }
}

/// A record as stored in a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    /// Position of this record within its partition.
    pub offset: Offset,
    pub key: String,
    pub correlation_tag: Option<String>,
    pub payload: Vec<u8>,
    /// Broker (or append) time.
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Decodes the JSON record value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Returns true if the record carries exactly this correlation tag.
    pub fn is_tagged(&self, tag: &str) -> bool {
        self.correlation_tag.as_deref() == Some(tag)
    }
}
