//! In-flight saga instance.

use common::PlayerId;
use serde::Serialize;
use uuid::Uuid;

use crate::events::{LegRef, SagaEvent};
use crate::model::Operation;
use crate::state::SagaState;

/// Progress of a single leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LegStatus {
    Dispatched,
    Succeeded,
    Failed,
    Compensated,
    CompensationFailed,
}

/// A leg as tracked by the saga.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegRecord {
    pub leg: LegRef,
    /// None if the command never reached the log.
    pub tag: Option<String>,
    pub reference: Option<String>,
    pub status: LegStatus,
}

/// State of one saga execution, built by folding [`SagaEvent`]s.
///
/// Lives only as long as the request that created it; nothing is persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SagaInstance {
    id: Option<Uuid>,
    player_id: Option<PlayerId>,
    operation: Option<Operation>,
    state: SagaState,
    total_price: Option<f64>,
    legs: Vec<LegRecord>,
    failure_reason: Option<String>,
    events_applied: usize,
}

impl SagaInstance {
    pub fn apply(&mut self, event: SagaEvent) {
        self.events_applied += 1;
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id);
                self.player_id = Some(data.player_id);
                self.operation = Some(data.operation);
                self.state = SagaState::Pricing;
            }
            SagaEvent::Priced(data) => {
                self.total_price = Some(data.total);
            }
            SagaEvent::Rejected(data) => {
                self.state = SagaState::Rejected;
                self.failure_reason = Some(data.reason);
            }
            SagaEvent::PhaseStarted(data) => {
                if self.state.can_dispatch() {
                    self.state = SagaState::Dispatching;
                } else {
                    tracing::warn!(
                        state = %self.state,
                        domain = %data.domain,
                        "phase start ignored"
                    );
                }
            }
            SagaEvent::LegDispatched(data) => {
                self.legs.push(LegRecord {
                    leg: data.leg,
                    tag: Some(data.tag),
                    reference: None,
                    status: LegStatus::Dispatched,
                });
            }
            SagaEvent::CollectingStarted(_) => {
                if self.state == SagaState::Dispatching {
                    self.state = SagaState::Collecting;
                }
            }
            SagaEvent::LegSucceeded(data) => {
                let record = self.leg_mut(data.leg);
                record.status = LegStatus::Succeeded;
                record.reference = Some(data.reference);
            }
            SagaEvent::LegFailed(data) => {
                self.leg_mut(data.leg).status = LegStatus::Failed;
                self.failure_reason.get_or_insert(data.error);
                self.state = SagaState::PartiallyFailed;
            }
            SagaEvent::CompensationStarted(_) => {
                if self.state.can_compensate() {
                    self.state = SagaState::Compensating;
                } else {
                    tracing::warn!(state = %self.state, "compensation start ignored");
                }
            }
            SagaEvent::CompensationIssued(leg) => {
                self.leg_mut(leg).status = LegStatus::Compensated;
            }
            SagaEvent::CompensationFailed(data) => {
                // Compensation failures are recorded but don't stop the chain
                self.leg_mut(data.leg).status = LegStatus::CompensationFailed;
            }
            SagaEvent::SagaSucceeded(_) => {
                self.state = SagaState::Succeeded;
            }
            SagaEvent::SagaFailed(data) => {
                self.state = SagaState::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
    }

    /// Finds the leg, registering it if it was never dispatched.
    fn leg_mut(&mut self, leg: LegRef) -> &mut LegRecord {
        let position = match self.legs.iter().position(|r| r.leg == leg) {
            Some(position) => position,
            None => {
                self.legs.push(LegRecord {
                    leg,
                    tag: None,
                    reference: None,
                    status: LegStatus::Failed,
                });
                self.legs.len() - 1
            }
        };
        &mut self.legs[position]
    }
}

// Query methods
impl SagaInstance {
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn player_id(&self) -> Option<&PlayerId> {
        self.player_id.as_ref()
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn total_price(&self) -> Option<f64> {
        self.total_price
    }

    pub fn legs(&self) -> &[LegRecord] {
        &self.legs
    }

    /// Legs currently in `status`.
    pub fn legs_with(&self, status: LegStatus) -> impl Iterator<Item = &LegRecord> {
        self.legs.iter().filter(move |r| r.status == status)
    }

    /// Returns the first failure recorded, or the final reason once failed.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn events_applied(&self) -> usize {
        self.events_applied
    }
}
