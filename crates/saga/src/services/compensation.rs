//! Compensating commands for applied legs.

use std::sync::Arc;

use crate::command::RollbackRequest;
use crate::config::SagaConfig;
use crate::error::SagaError;
use crate::services::publisher::CommandPublisher;

/// Publishes compensating commands.
///
/// Compensation is fire-and-forget: the wallet and inventory services
/// send no receipt for a rollback, so success means the command reached
/// the log.
pub struct CompensationExecutor<P> {
    publisher: Arc<P>,
    config: SagaConfig,
}

impl<P: CommandPublisher> CompensationExecutor<P> {
    pub fn new(publisher: Arc<P>, config: SagaConfig) -> Self {
        Self { publisher, config }
    }

    #[tracing::instrument(
        skip(self, rollback),
        fields(key = rollback.operation_key(), reference = rollback.reference())
    )]
    pub async fn compensate(&self, rollback: &RollbackRequest) -> Result<(), SagaError> {
        let command = rollback.to_command(&self.config)?;
        match tokio::time::timeout(self.config.publish_timeout, self.publisher.publish(&command))
            .await
        {
            Ok(Ok(_)) => {
                metrics::counter!("saga_compensations_total").increment(1);
                tracing::info!(item_id = %rollback.item_id(), "compensating command issued");
                Ok(())
            }
            Ok(Err(e)) => {
                metrics::counter!("saga_compensation_failures_total").increment(1);
                Err(e)
            }
            Err(_) => {
                metrics::counter!("saga_compensation_failures_total").increment(1);
                Err(SagaError::CommandPublishFailed {
                    topic: command.topic,
                    reason: "publish timed out".to_string(),
                })
            }
        }
    }
}
