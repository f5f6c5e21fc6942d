//! Saga lifecycle events.
//!
//! The coordinator records every transition of a saga as an event and
//! folds it into a [`SagaInstance`](crate::SagaInstance).

use chrono::{DateTime, Utc};
use common::PlayerId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{LegDomain, Operation};

/// Events that can occur during saga execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// Every line item was priced from the catalog.
    Priced(PricedData),

    /// The saga was refused before anything was published.
    Rejected(ReasonData),

    /// A phase started dispatching its legs.
    PhaseStarted(PhaseData),

    /// A leg's command was appended to the log.
    LegDispatched(LegDispatchedData),

    /// The phase stopped dispatching and is waiting for receipts.
    CollectingStarted(CollectingData),

    /// A leg's receipt reported success.
    LegSucceeded(LegSucceededData),

    /// A leg failed to publish, timed out or reported an error.
    LegFailed(LegFailedData),

    /// Compensation started for the applied legs.
    CompensationStarted(CompensationData),

    /// A compensating command was published.
    CompensationIssued(LegRef),

    /// A compensating command could not be published (compensation continues).
    CompensationFailed(LegFailedData),

    /// Saga completed successfully.
    SagaSucceeded(SagaSucceededData),

    /// Saga failed after compensation.
    SagaFailed(SagaFailedData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::Priced(_) => "Priced",
            SagaEvent::Rejected(_) => "Rejected",
            SagaEvent::PhaseStarted(_) => "PhaseStarted",
            SagaEvent::LegDispatched(_) => "LegDispatched",
            SagaEvent::CollectingStarted(_) => "CollectingStarted",
            SagaEvent::LegSucceeded(_) => "LegSucceeded",
            SagaEvent::LegFailed(_) => "LegFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationIssued(_) => "CompensationIssued",
            SagaEvent::CompensationFailed(_) => "CompensationFailed",
            SagaEvent::SagaSucceeded(_) => "SagaSucceeded",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: Uuid,
    pub player_id: PlayerId,
    pub operation: Operation,
    pub item_count: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedData {
    /// Sum of the stamped unit prices.
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonData {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseData {
    pub domain: LegDomain,
}

/// Identifies a leg: the line item position and the service it mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegRef {
    pub index: usize,
    pub domain: LegDomain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegDispatchedData {
    pub leg: LegRef,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectingData {
    pub domain: LegDomain,
    /// Number of legs awaiting a receipt.
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegSucceededData {
    pub leg: LegRef,
    /// Transaction id (wallet) or inventory id (inventory).
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegFailedData {
    pub leg: LegRef,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationData {
    /// Number of applied legs to reverse.
    pub legs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaSucceededData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(
        saga_id: Uuid,
        player_id: PlayerId,
        operation: Operation,
        item_count: usize,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            player_id,
            operation,
            item_count,
            started_at: Utc::now(),
        })
    }

    pub fn priced(total: f64) -> Self {
        SagaEvent::Priced(PricedData { total })
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        SagaEvent::Rejected(ReasonData {
            reason: reason.into(),
        })
    }

    pub fn phase_started(domain: LegDomain) -> Self {
        SagaEvent::PhaseStarted(PhaseData { domain })
    }

    pub fn leg_dispatched(leg: LegRef, tag: impl Into<String>) -> Self {
        SagaEvent::LegDispatched(LegDispatchedData {
            leg,
            tag: tag.into(),
        })
    }

    pub fn collecting_started(domain: LegDomain, pending: usize) -> Self {
        SagaEvent::CollectingStarted(CollectingData { domain, pending })
    }

    pub fn leg_succeeded(leg: LegRef, reference: impl Into<String>) -> Self {
        SagaEvent::LegSucceeded(LegSucceededData {
            leg,
            reference: reference.into(),
        })
    }

    pub fn leg_failed(leg: LegRef, error: impl Into<String>) -> Self {
        SagaEvent::LegFailed(LegFailedData {
            leg,
            error: error.into(),
        })
    }

    pub fn compensation_started(legs: usize) -> Self {
        SagaEvent::CompensationStarted(CompensationData { legs })
    }

    pub fn compensation_issued(leg: LegRef) -> Self {
        SagaEvent::CompensationIssued(leg)
    }

    pub fn compensation_failed(leg: LegRef, error: impl Into<String>) -> Self {
        SagaEvent::CompensationFailed(LegFailedData {
            leg,
            error: error.into(),
        })
    }

    pub fn saga_succeeded() -> Self {
        SagaEvent::SagaSucceeded(SagaSucceededData {
            completed_at: Utc::now(),
        })
    }

    pub fn saga_failed(reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}
