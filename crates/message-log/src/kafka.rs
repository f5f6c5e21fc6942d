//! Kafka-compatible message log backed by rdkafka.
//!
//! Offsets are managed by the caller through an
//! [`OffsetStore`](crate::OffsetStore), not through consumer-group commits:
//! every reader is assigned its partition explicitly at the requested
//! position and auto-commit is disabled.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::TopicPartitionList;

use crate::{
    CORRELATION_TAG_HEADER, LogRecord, MessageLogError, Offset, OutgoingRecord, PartitionRef,
    Result,
    log::{CommandLog, RecordStream, ResponseLog},
};

/// Message log talking to a Kafka-compatible broker.
pub struct KafkaMessageLog {
    producer: FutureProducer,
    brokers: String,
    client_id: String,
    timeout: Duration,
    buffer_size: usize,
}

impl KafkaMessageLog {
    /// Creates a log with default settings for the given brokers.
    pub fn new(brokers: &str) -> Result<Self> {
        Self::builder().brokers(brokers).build()
    }

    /// Creates a new builder.
    pub fn builder() -> KafkaMessageLogBuilder {
        KafkaMessageLogBuilder::default()
    }

    /// Returns the configured broker list.
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`KafkaMessageLog`].
#[derive(Debug, Default)]
pub struct KafkaMessageLogBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
}

impl KafkaMessageLogBuilder {
    /// Comma-separated bootstrap servers.
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Client id reported to the broker; also used as the consumer group id.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Producer acknowledgement mode ("0", "1" or "all"). Default: "all".
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Bound on a single append. Default: 5 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Records buffered between the consumer task and a reader. Default: 256.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    pub fn build(self) -> Result<KafkaMessageLog> {
        let brokers = self
            .brokers
            .ok_or_else(|| MessageLogError::Transport("brokers not configured".to_string()))?;
        let client_id = self.client_id.unwrap_or_else(|| "payment".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("client.id", &client_id)
            .set("acks", &acks)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()
            .map_err(|e| MessageLogError::Transport(format!("failed to create producer: {e}")))?;

        tracing::info!(%brokers, %client_id, %acks, "kafka message log created");

        Ok(KafkaMessageLog {
            producer,
            brokers,
            client_id,
            timeout,
            buffer_size: self.buffer_size.unwrap_or(256),
        })
    }
}

fn to_log_record(message: &BorrowedMessage<'_>) -> LogRecord {
    let correlation_tag = message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == CORRELATION_TAG_HEADER)
            .and_then(|header| header.value)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    });

    let timestamp = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    LogRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: Offset::new(message.offset()),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default(),
        correlation_tag,
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp,
    }
}

#[async_trait]
impl CommandLog for KafkaMessageLog {
    async fn append(&self, record: OutgoingRecord) -> Result<Offset> {
        let mut future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload);

        if let Some(tag) = record.correlation_tag.as_deref() {
            future_record = future_record.headers(OwnedHeaders::new().insert(Header {
                key: CORRELATION_TAG_HEADER,
                value: Some(tag),
            }));
        }

        match self
            .producer
            .send(future_record, Timeout::After(self.timeout))
            .await
        {
            Ok((partition, offset)) => {
                metrics::counter!("message_log_appends_total").increment(1);
                tracing::debug!(
                    topic = %record.topic,
                    key = %record.key,
                    partition,
                    offset,
                    "record appended"
                );
                Ok(Offset::new(offset))
            }
            Err((kafka_error, _)) => {
                tracing::error!(topic = %record.topic, error = %kafka_error, "append failed");
                Err(MessageLogError::AppendFailed {
                    topic: record.topic,
                    reason: kafka_error.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl ResponseLog for KafkaMessageLog {
    async fn read_from(&self, partition: &PartitionRef, from: Offset) -> Result<RecordStream> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.client_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| MessageLogError::Transport(format!("failed to create consumer: {e}")))?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(
                &partition.topic,
                partition.partition,
                rdkafka::Offset::Offset(from.as_i64()),
            )
            .map_err(|e| MessageLogError::Transport(e.to_string()))?;
        consumer
            .assign(&assignment)
            .map_err(|e| MessageLogError::Transport(format!("failed to assign {partition}: {e}")))?;

        tracing::debug!(%partition, offset = %from, "reader attached");

        let (tx, rx) = tokio::sync::mpsc::channel(self.buffer_size);

        // The consumer lives in its own task; it exits once the reader drops
        // the stream.
        tokio::spawn(async move {
            let mut messages = consumer.stream();
            loop {
                let next = tokio::select! {
                    () = tx.closed() => break,
                    next = messages.next() => next,
                };
                let Some(result) = next else { break };

                let item = result
                    .map(|message| to_log_record(&message))
                    .map_err(|e| MessageLogError::Transport(format!("failed to receive: {e}")));
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            tracing::debug!("reader task exiting");
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}
