use thiserror::Error;

/// Errors that can occur when interacting with the message log or the offset store.
#[derive(Debug, Error)]
pub enum MessageLogError {
    /// A record could not be appended to a topic.
    #[error("Failed to append to topic '{topic}': {reason}")]
    AppendFailed { topic: String, reason: String },

    /// The broker connection or the consumer stream failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The requested partition does not exist on the topic.
    #[error("Unknown partition {partition} for topic '{topic}'")]
    UnknownPartition { topic: String, partition: i32 },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for message log operations.
pub type Result<T> = std::result::Result<T, MessageLogError>;
