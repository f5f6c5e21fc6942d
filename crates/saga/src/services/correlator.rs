//! Matching receipts on the response partition to the legs awaiting them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use message_log::{
    LogRecord, MessageLogError, Offset, OffsetKey, OffsetStore, OffsetStoreExt, ResponseLog,
};
use tokio::sync::Mutex;

use crate::error::SagaError;
use crate::model::TransferReceipt;
use crate::tag::CorrelationTag;

/// Trait for awaiting the receipt answering a tagged command.
///
/// Callers take a [`checkpoint`](ResponseCorrelator::checkpoint) before
/// publishing and wait from it. A receipt is always appended after its
/// command, so it cannot lie before the checkpoint even if other waiters
/// advance the stored position in the meantime.
#[async_trait]
pub trait ResponseCorrelator: Send + Sync + 'static {
    /// Returns the position to read receipts from.
    async fn checkpoint(&self) -> Result<Offset, SagaError>;

    /// Waits up to `timeout` for the receipt tagged `tag`, reading from `from`.
    ///
    /// On success the stored read position has moved past the receipt, so
    /// a restarted coordinator will not consume it again. On timeout the
    /// position is left untouched.
    async fn await_receipt(
        &self,
        tag: &CorrelationTag,
        from: Offset,
        timeout: Duration,
    ) -> Result<TransferReceipt, SagaError>;
}

#[async_trait]
impl<T: ResponseCorrelator + ?Sized> ResponseCorrelator for Arc<T> {
    async fn checkpoint(&self) -> Result<Offset, SagaError> {
        (**self).checkpoint().await
    }

    async fn await_receipt(
        &self,
        tag: &CorrelationTag,
        from: Offset,
        timeout: Duration,
    ) -> Result<TransferReceipt, SagaError> {
        (**self).await_receipt(tag, from, timeout).await
    }
}

/// Correlator that tails a [`ResponseLog`] partition from the position
/// kept in an [`OffsetStore`].
///
/// Each waiting leg reads the partition independently from its checkpoint
/// and skips records carrying other tags. Advances of the stored position
/// are serialized and never move it backwards.
pub struct LogResponseCorrelator<R, O> {
    log: R,
    offsets: O,
    key: OffsetKey,
    advance_lock: Mutex<()>,
}

impl<R: ResponseLog, O: OffsetStore> LogResponseCorrelator<R, O> {
    pub fn new(log: R, offsets: O, key: OffsetKey) -> Self {
        Self {
            log,
            offsets,
            key,
            advance_lock: Mutex::new(()),
        }
    }

    pub fn offset_key(&self) -> &OffsetKey {
        &self.key
    }

    /// Reads forward until the record tagged `tag` shows up.
    async fn find_tagged(&self, tag: &CorrelationTag, from: Offset) -> Result<LogRecord, SagaError> {
        let mut records = self.log.read_from(&self.key.partition, from).await?;

        while let Some(record) = records.next().await {
            let record = record?;
            if record.is_tagged(tag.as_str()) {
                return Ok(record);
            }
        }

        Err(SagaError::Log(MessageLogError::Transport(format!(
            "response stream for {} ended",
            self.key.partition
        ))))
    }
}

#[async_trait]
impl<R, O> ResponseCorrelator for LogResponseCorrelator<R, O>
where
    R: ResponseLog + 'static,
    O: OffsetStore + 'static,
{
    async fn checkpoint(&self) -> Result<Offset, SagaError> {
        Ok(self.offsets.load_or_beginning(&self.key).await?)
    }

    #[tracing::instrument(skip(self, tag), fields(tag = %tag))]
    async fn await_receipt(
        &self,
        tag: &CorrelationTag,
        from: Offset,
        timeout: Duration,
    ) -> Result<TransferReceipt, SagaError> {
        let record = match tokio::time::timeout(timeout, self.find_tagged(tag, from)).await {
            Ok(found) => found?,
            Err(_) => {
                metrics::counter!("correlator_timeouts_total").increment(1);
                tracing::warn!(?timeout, "no receipt before deadline");
                return Err(SagaError::ResponseTimeout {
                    tag: tag.to_string(),
                });
            }
        };

        // Decode before advancing: a receipt that cannot be read must stay
        // available for inspection.
        let receipt: TransferReceipt = record.decode()?;

        let stored = {
            let _guard = self.advance_lock.lock().await;
            self.offsets.advance(&self.key, record.offset.next()).await?
        };

        metrics::counter!("correlator_receipts_total").increment(1);
        tracing::debug!(offset = %record.offset, %stored, "receipt matched");
        Ok(receipt)
    }
}
