//! Saga error types.

use std::fmt;

use common::ItemId;
use message_log::MessageLogError;
use serde::Serialize;
use thiserror::Error;

use crate::model::LegDomain;

/// A leg whose downstream mutation could not be reversed.
///
/// Carries enough detail for an operator to reconcile the wallet or
/// inventory service by hand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnreversedLeg {
    pub item_id: ItemId,
    pub domain: LegDomain,
    /// Transaction id (wallet) or inventory id (inventory) of the mutation.
    pub reference: String,
    pub reason: String,
}

/// What compensation achieved for a failed saga.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reversal {
    /// No downstream mutation had been applied.
    NotNeeded,
    /// Every applied mutation received a compensating command.
    FullyReversed { legs: usize },
    /// Some compensating commands could not be published.
    PartiallyReversed {
        reversed: usize,
        unreversed: Vec<UnreversedLeg>,
    },
}

impl Reversal {
    /// Returns true if the downstream services are back to their prior state.
    pub fn is_complete(&self) -> bool {
        !matches!(self, Reversal::PartiallyReversed { .. })
    }
}

impl fmt::Display for Reversal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reversal::NotNeeded => write!(f, "no downstream mutation was applied"),
            Reversal::FullyReversed { legs } => write!(f, "{legs} applied legs were reversed"),
            Reversal::PartiallyReversed {
                reversed,
                unreversed,
            } => write!(
                f,
                "{reversed} legs reversed, {} need manual reconciliation",
                unreversed.len()
            ),
        }
    }
}

fn join_ids(ids: &[ItemId]) -> String {
    ids.iter()
        .map(ItemId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request cannot be executed as given.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The catalog could not be reached or answered garbage.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// One or more requested items are missing from the catalog.
    #[error("Items not found in catalog: {}", join_ids(.missing))]
    ItemsNotFound { missing: Vec<ItemId> },

    /// A line item cannot be priced.
    #[error("Cannot price item {item_id}: {reason}")]
    PricingMismatch { item_id: ItemId, reason: String },

    /// A command could not be appended to the log.
    #[error("Failed to publish to '{topic}': {reason}")]
    CommandPublishFailed { topic: String, reason: String },

    /// No receipt arrived for a tag before the deadline.
    #[error("No receipt for '{tag}' before the deadline")]
    ResponseTimeout { tag: String },

    /// A downstream service reported failure for a leg.
    #[error("Leg for item {item_id} failed: {reason}")]
    LegFailed { item_id: ItemId, reason: String },

    /// A leg task ended without producing an outcome.
    #[error("Leg aborted: {0}")]
    LegAborted(String),

    /// The saga failed after dispatching; compensation has run.
    #[error("Saga failed: {reason} ({reversal})")]
    Failed { reason: String, reversal: Reversal },

    /// The caller cancelled the saga; compensation has run.
    #[error("Saga cancelled ({reversal})")]
    Cancelled { reversal: Reversal },

    /// Message log error.
    #[error("Message log error: {0}")]
    Log(#[from] MessageLogError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns the compensation outcome for failures that reached dispatch.
    pub fn reversal(&self) -> Option<&Reversal> {
        match self {
            SagaError::Failed { reversal, .. } | SagaError::Cancelled { reversal } => {
                Some(reversal)
            }
            _ => None,
        }
    }

    /// Returns true if retrying the same request may succeed without
    /// operator involvement.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::CatalogUnavailable(_) => true,
            SagaError::Failed { reversal, .. } | SagaError::Cancelled { reversal } => {
                reversal.is_complete()
            }
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
