//! Command publishing onto the message log.

use std::sync::Arc;

use async_trait::async_trait;
use message_log::{CommandLog, Offset};

use crate::command::Command;
use crate::error::SagaError;

/// Trait for appending commands to the wallet and inventory topics.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Appends `command` and returns the offset it was written at.
    ///
    /// Fails with [`SagaError::CommandPublishFailed`] if the log refuses it.
    async fn publish(&self, command: &Command) -> Result<Offset, SagaError>;
}

#[async_trait]
impl<T: CommandPublisher + ?Sized> CommandPublisher for Arc<T> {
    async fn publish(&self, command: &Command) -> Result<Offset, SagaError> {
        (**self).publish(command).await
    }
}

/// Publishes commands through a [`CommandLog`].
#[derive(Debug, Clone)]
pub struct LogCommandPublisher<L> {
    log: L,
}

impl<L: CommandLog> LogCommandPublisher<L> {
    pub fn new(log: L) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &L {
        &self.log
    }
}

#[async_trait]
impl<L: CommandLog> CommandPublisher for LogCommandPublisher<L> {
    async fn publish(&self, command: &Command) -> Result<Offset, SagaError> {
        let record = command.to_record()?;
        let offset = self.log.append(record).await.map_err(|e| {
            metrics::counter!("saga_publish_failures_total").increment(1);
            SagaError::CommandPublishFailed {
                topic: command.topic.clone(),
                reason: e.to_string(),
            }
        })?;

        tracing::debug!(
            topic = %command.topic,
            key = %command.operation_key,
            tag = command.tag.as_ref().map(|t| t.as_str()),
            %offset,
            "command published"
        );
        Ok(offset)
    }
}
