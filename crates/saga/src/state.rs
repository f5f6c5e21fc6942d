//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Pricing ──┬──► Rejected
///           └──► Dispatching ──► Collecting ──┬──► Dispatching (next phase)
///                     │                       ├──► Succeeded
///                     │                       └──► PartiallyFailed ──► Compensating ──► Failed
///                     └──────────────────────────► PartiallyFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Items are being priced against the catalog.
    #[default]
    Pricing,

    /// Commands for the current phase are being appended to the log.
    Dispatching,

    /// Waiting for receipts of the current phase.
    Collecting,

    /// At least one leg failed; compensation has not started yet.
    PartiallyFailed,

    /// Compensating commands are being issued.
    Compensating,

    /// Every leg of every phase succeeded (terminal state).
    Succeeded,

    /// Rejected before any command was published (terminal state).
    Rejected,

    /// Compensation finished after a failure (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if a new phase may start dispatching.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, SagaState::Pricing | SagaState::Collecting)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            SagaState::Dispatching | SagaState::Collecting | SagaState::PartiallyFailed
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Succeeded | SagaState::Rejected | SagaState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Pricing => "Pricing",
            SagaState::Dispatching => "Dispatching",
            SagaState::Collecting => "Collecting",
            SagaState::PartiallyFailed => "PartiallyFailed",
            SagaState::Compensating => "Compensating",
            SagaState::Succeeded => "Succeeded",
            SagaState::Rejected => "Rejected",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
