use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use tokio::sync::{Notify, RwLock};

use crate::{
    LogRecord, MessageLogError, Offset, OutgoingRecord, PartitionRef, Result,
    log::{CommandLog, RecordStream, ResponseLog},
};

#[derive(Default)]
struct Inner {
    /// Single-partition topics, indexed by topic name.
    topics: RwLock<HashMap<String, Vec<LogRecord>>>,
    appended: Notify,
    failing_appends: RwLock<HashSet<String>>,
    fail_on_read: RwLock<bool>,
}

/// In-memory message log for tests and local development.
///
/// Every topic has exactly one partition (0). Readers opened with
/// [`ResponseLog::read_from`] stay attached and are woken on each append,
/// so they behave like a live broker subscription.
#[derive(Clone, Default)]
pub struct InMemoryMessageLog {
    inner: Arc<Inner>,
}

impl InMemoryMessageLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every append to `topic` fail until cleared.
    pub async fn set_fail_appends_to(&self, topic: &str, fail: bool) {
        let mut failing = self.inner.failing_appends.write().await;
        if fail {
            failing.insert(topic.to_string());
        } else {
            failing.remove(topic);
        }
    }

    /// Makes newly opened readers yield a transport error.
    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.inner.fail_on_read.write().await = fail;
    }

    /// Returns a copy of every record appended to `topic`.
    pub async fn records(&self, topic: &str) -> Vec<LogRecord> {
        self.inner
            .topics
            .read()
            .await
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of records appended to `topic`.
    pub async fn record_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .await
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Returns the total number of records across all topics.
    pub async fn total_record_count(&self) -> usize {
        self.inner.topics.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl CommandLog for InMemoryMessageLog {
    async fn append(&self, record: OutgoingRecord) -> Result<Offset> {
        if self.inner.failing_appends.read().await.contains(&record.topic) {
            return Err(MessageLogError::AppendFailed {
                topic: record.topic,
                reason: "broker unavailable".to_string(),
            });
        }

        let offset = {
            let mut topics = self.inner.topics.write().await;
            let partition = topics.entry(record.topic.clone()).or_default();
            let offset = Offset::new(partition.len() as i64);
            partition.push(LogRecord {
                topic: record.topic,
                partition: 0,
                offset,
                key: record.key,
                correlation_tag: record.correlation_tag,
                payload: record.payload,
                timestamp: Utc::now(),
            });
            offset
        };

        metrics::counter!("message_log_appends_total").increment(1);
        self.inner.appended.notify_waiters();
        Ok(offset)
    }
}

#[async_trait]
impl ResponseLog for InMemoryMessageLog {
    async fn read_from(&self, partition: &PartitionRef, from: Offset) -> Result<RecordStream> {
        if partition.partition != 0 {
            return Err(MessageLogError::UnknownPartition {
                topic: partition.topic.clone(),
                partition: partition.partition,
            });
        }

        if *self.inner.fail_on_read.read().await {
            let err = MessageLogError::Transport(format!("lost connection to {partition}"));
            return Ok(Box::pin(stream::iter(vec![Err(err)])));
        }

        let state = (Arc::clone(&self.inner), partition.topic.clone(), from.as_i64().max(0));
        let stream = stream::unfold(state, |(inner, topic, position)| async move {
            loop {
                let found = {
                    // Register interest before looking so an append between
                    // the check and the await still wakes us.
                    let notified = inner.appended.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let next = inner
                        .topics
                        .read()
                        .await
                        .get(&topic)
                        .and_then(|records| records.get(position as usize).cloned());

                    if next.is_none() {
                        notified.await;
                    }
                    next
                };

                if let Some(record) = found {
                    return Some((Ok(record), (inner, topic, position + 1)));
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
