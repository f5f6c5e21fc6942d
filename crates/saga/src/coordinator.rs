//! Saga coordinator for buy and sell sagas.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use common::{ItemId, PlayerId};
use message_log::Offset;
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::command::{Command, RollbackRequest};
use crate::config::SagaConfig;
use crate::error::{Reversal, SagaError, UnreversedLeg};
use crate::events::{LegRef, SagaEvent};
use crate::instance::SagaInstance;
use crate::model::{LegDomain, LineItem, Operation, PurchaseRequest, TransferReceipt};
use crate::services::catalog::CatalogLookup;
use crate::services::compensation::CompensationExecutor;
use crate::services::correlator::ResponseCorrelator;
use crate::services::publisher::CommandPublisher;
use crate::state::SagaState;
use crate::tag::{CorrelationTag, TagGenerator};

/// Resolves when the caller gives up on a saga.
pub type CancelSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A signal that never fires.
pub fn never_cancelled() -> CancelSignal {
    Box::pin(std::future::pending())
}

/// Outcome of [`SagaCoordinator::run`], with the instance for inspection.
#[derive(Debug)]
pub struct SagaReport {
    pub instance: SagaInstance,
    pub result: Result<Vec<TransferReceipt>, SagaError>,
}

/// A leg whose downstream mutation was applied.
#[derive(Debug)]
struct AppliedLeg {
    leg: LegRef,
    item_id: ItemId,
    receipt: TransferReceipt,
}

#[derive(Debug, Default)]
struct PhaseOutcome {
    /// In the order receipts arrived.
    applied: Vec<AppliedLeg>,
    /// First failure observed in the phase.
    failure: Option<SagaError>,
    cancelled: bool,
}

enum Dispatch {
    Published,
    /// The log refused the command.
    Refused(SagaError),
    /// The append timed out; the command may still have landed.
    Unconfirmed(SagaError),
}

type LegResult = (LegRef, ItemId, Result<TransferReceipt, SagaError>);

/// Orchestrates buy and sell sagas.
///
/// A saga prices every line item against the catalog, then runs two
/// phases of legs (wallet then inventory for a buy, inventory then wallet
/// for a sell). Legs within a phase run concurrently; the second phase
/// starts only if every leg of the first succeeded. When any leg fails,
/// every applied leg is compensated in reverse order.
pub struct SagaCoordinator<C, P, R> {
    catalog: C,
    publisher: Arc<P>,
    compensation: CompensationExecutor<P>,
    correlator: Arc<R>,
    tags: TagGenerator,
    config: SagaConfig,
}

impl<C, P, R> SagaCoordinator<C, P, R>
where
    C: CatalogLookup,
    P: CommandPublisher,
    R: ResponseCorrelator,
{
    /// Creates a new saga coordinator.
    pub fn new(config: SagaConfig, catalog: C, publisher: P, correlator: R) -> Self {
        let publisher = Arc::new(publisher);
        Self {
            compensation: CompensationExecutor::new(Arc::clone(&publisher), config.clone()),
            catalog,
            publisher,
            correlator: Arc::new(correlator),
            tags: TagGenerator::new(),
            config,
        }
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Buys `item_ids` for the player, returning one receipt per item.
    pub async fn buy_items(
        &self,
        player_id: PlayerId,
        item_ids: Vec<ItemId>,
    ) -> Result<Vec<TransferReceipt>, SagaError> {
        self.execute(PurchaseRequest::buy(player_id, item_ids)).await
    }

    /// Sells `item_ids` from the player's inventory, returning one receipt
    /// per item.
    pub async fn sell_items(
        &self,
        player_id: PlayerId,
        item_ids: Vec<ItemId>,
    ) -> Result<Vec<TransferReceipt>, SagaError> {
        self.execute(PurchaseRequest::sell(player_id, item_ids)).await
    }

    pub async fn execute(
        &self,
        request: PurchaseRequest,
    ) -> Result<Vec<TransferReceipt>, SagaError> {
        self.run(request, never_cancelled()).await.result
    }

    /// Runs a saga to a terminal state.
    ///
    /// If `cancel` fires, pending legs are abandoned and every leg known
    /// to have succeeded is compensated before returning.
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(
            player_id = %request.player_id,
            operation = %request.operation,
            items = request.items.len()
        )
    )]
    pub async fn run(&self, request: PurchaseRequest, mut cancel: CancelSignal) -> SagaReport {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();
        let saga_id = Uuid::new_v4();

        let mut saga = SagaInstance::default();
        record(
            &mut saga,
            SagaEvent::saga_started(
                saga_id,
                request.player_id.clone(),
                request.operation,
                request.items.len(),
            ),
        );

        let result = self.drive(&mut saga, request, &mut cancel).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        match &result {
            Ok(_) => {
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(%saga_id, duration, "saga completed successfully");
            }
            Err(e) if saga.state() == SagaState::Rejected => {
                metrics::counter!("saga_rejected").increment(1);
                tracing::info!(%saga_id, error = %e, "saga rejected");
            }
            Err(e) => {
                metrics::counter!("saga_failed").increment(1);
                tracing::warn!(%saga_id, error = %e, "saga failed");
            }
        }

        SagaReport {
            instance: saga,
            result,
        }
    }

    async fn drive(
        &self,
        saga: &mut SagaInstance,
        request: PurchaseRequest,
        cancel: &mut CancelSignal,
    ) -> Result<Vec<TransferReceipt>, SagaError> {
        let items = match self.price(&request, cancel).await {
            Ok(items) => items,
            Err(e) => {
                record(saga, SagaEvent::rejected(e.to_string()));
                return Err(e);
            }
        };
        let total = items.iter().filter_map(LineItem::unit_price).sum();
        record(saga, SagaEvent::priced(total));

        let PurchaseRequest {
            player_id,
            operation,
            ..
        } = request;
        let mut receipts: Vec<TransferReceipt> = items
            .iter()
            .map(|line| TransferReceipt::for_line(&player_id, line.item_id()))
            .collect();
        let mut applied: Vec<AppliedLeg> = Vec::new();

        for domain in operation.phases() {
            let outcome = self
                .run_phase(saga, &player_id, operation, domain, &items, cancel)
                .await;

            for leg in &outcome.applied {
                if leg.receipt.is_success() {
                    receipts[leg.leg.index].merge_leg(domain, &leg.receipt);
                }
            }
            applied.extend(outcome.applied);

            if outcome.cancelled {
                let reversal = self.compensate(saga, &player_id, operation, &applied).await;
                record(saga, SagaEvent::saga_failed("cancelled by caller"));
                return Err(SagaError::Cancelled { reversal });
            }
            if let Some(failure) = outcome.failure {
                let reversal = self.compensate(saga, &player_id, operation, &applied).await;
                let reason = failure.to_string();
                record(saga, SagaEvent::saga_failed(reason.clone()));
                return Err(SagaError::Failed { reason, reversal });
            }
        }

        record(saga, SagaEvent::saga_succeeded());
        Ok(receipts)
    }

    /// Prices every line item from the catalog, all or nothing.
    async fn price(
        &self,
        request: &PurchaseRequest,
        cancel: &mut CancelSignal,
    ) -> Result<Vec<LineItem>, SagaError> {
        request.validate()?;
        let ids = request.distinct_item_ids();

        let lookup = tokio::select! {
            () = cancel.as_mut() => {
                return Err(SagaError::Cancelled { reversal: Reversal::NotNeeded });
            }
            lookup = tokio::time::timeout(
                self.config.catalog_timeout,
                self.catalog.find_items_in_ids(&ids),
            ) => lookup,
        };
        let catalog = lookup.map_err(|_| {
            SagaError::CatalogUnavailable(format!(
                "no answer within {:?}",
                self.config.catalog_timeout
            ))
        })??;
        catalog.require_all(&ids)?;

        let mut items = request.items.clone();
        for line in &mut items {
            let price = catalog
                .price_of(line.item_id())
                .ok_or_else(|| SagaError::ItemsNotFound {
                    missing: vec![line.item_id().clone()],
                })?;
            line.stamp_price(price)?;
        }
        Ok(items)
    }

    #[tracing::instrument(skip(self, saga, player_id, operation, items, cancel))]
    async fn run_phase(
        &self,
        saga: &mut SagaInstance,
        player_id: &PlayerId,
        operation: Operation,
        domain: LegDomain,
        items: &[LineItem],
        cancel: &mut CancelSignal,
    ) -> PhaseOutcome {
        record(saga, SagaEvent::phase_started(domain));
        let mut outcome = PhaseOutcome::default();

        let from = match self.correlator.checkpoint().await {
            Ok(from) => from,
            Err(e) => {
                outcome.failure = Some(e);
                return outcome;
            }
        };

        let mut pending: JoinSet<LegResult> = JoinSet::new();
        for (index, line) in items.iter().enumerate() {
            let leg = LegRef { index, domain };
            let tag = self.tags.next(player_id, line.item_id(), domain, operation);

            let dispatched = tokio::select! {
                biased;
                () = cancel.as_mut() => {
                    outcome.cancelled = true;
                    break;
                }
                dispatched = self.dispatch(domain, operation, player_id, line, tag.clone()) => dispatched,
            };

            match dispatched {
                Dispatch::Published => {
                    metrics::counter!("saga_legs_dispatched_total").increment(1);
                    record(saga, SagaEvent::leg_dispatched(leg, tag.as_str()));
                    self.await_leg(&mut pending, leg, line.item_id().clone(), tag, from);
                }
                Dispatch::Refused(e) => {
                    record(saga, SagaEvent::leg_failed(leg, e.to_string()));
                    outcome.failure = Some(e);
                    break;
                }
                Dispatch::Unconfirmed(e) => {
                    // Keep listening so a command that did land gets compensated.
                    record(saga, SagaEvent::leg_failed(leg, e.to_string()));
                    outcome.failure = Some(e);
                    self.await_leg(&mut pending, leg, line.item_id().clone(), tag, from);
                    break;
                }
            }
        }

        if !outcome.cancelled {
            record(saga, SagaEvent::collecting_started(domain, pending.len()));
            loop {
                // Finished legs win over a cancellation that fires alongside.
                let joined = tokio::select! {
                    biased;
                    joined = pending.join_next() => joined,
                    () = cancel.as_mut() => {
                        outcome.cancelled = true;
                        break;
                    }
                };
                let Some(joined) = joined else { break };
                absorb(saga, domain, &mut outcome, joined);
            }
        }

        if outcome.cancelled {
            // A leg may have consumed its receipt before the abort lands; it
            // still has to be compensated.
            pending.abort_all();
            while let Some(joined) = pending.join_next().await {
                if !matches!(&joined, Err(e) if e.is_cancelled()) {
                    absorb(saga, domain, &mut outcome, joined);
                }
            }
        }
        outcome
    }

    async fn dispatch(
        &self,
        domain: LegDomain,
        operation: Operation,
        player_id: &PlayerId,
        line: &LineItem,
        tag: CorrelationTag,
    ) -> Dispatch {
        let command = match Command::for_leg(&self.config, domain, operation, player_id, line, tag)
        {
            Ok(command) => command,
            Err(e) => return Dispatch::Refused(e),
        };

        match tokio::time::timeout(self.config.publish_timeout, self.publisher.publish(&command))
            .await
        {
            Ok(Ok(_)) => Dispatch::Published,
            Ok(Err(e)) => Dispatch::Refused(e),
            Err(_) => Dispatch::Unconfirmed(SagaError::CommandPublishFailed {
                topic: command.topic,
                reason: "publish timed out".to_string(),
            }),
        }
    }

    fn await_leg(
        &self,
        pending: &mut JoinSet<LegResult>,
        leg: LegRef,
        item_id: ItemId,
        tag: CorrelationTag,
        from: Offset,
    ) {
        let correlator = Arc::clone(&self.correlator);
        let timeout = self.config.response_timeout;
        pending.spawn(async move {
            let result = correlator.await_receipt(&tag, from, timeout).await;
            (leg, item_id, result)
        });
    }

    /// Issues a rollback for every applied leg, latest first.
    ///
    /// Never stops early: a failed rollback is recorded and the rest still
    /// run.
    #[tracing::instrument(skip(self, saga, player_id, applied), fields(applied = applied.len()))]
    async fn compensate(
        &self,
        saga: &mut SagaInstance,
        player_id: &PlayerId,
        operation: Operation,
        applied: &[AppliedLeg],
    ) -> Reversal {
        let rollbacks: Vec<(LegRef, RollbackRequest)> = applied
            .iter()
            .rev()
            .filter_map(|a| {
                RollbackRequest::for_leg(a.leg.domain, operation, player_id, &a.item_id, &a.receipt)
                    .map(|rollback| (a.leg, rollback))
            })
            .collect();

        if rollbacks.is_empty() {
            return Reversal::NotNeeded;
        }

        record(saga, SagaEvent::compensation_started(rollbacks.len()));
        let mut reversed = 0;
        let mut unreversed = Vec::new();
        for (leg, rollback) in rollbacks {
            match self.compensation.compensate(&rollback).await {
                Ok(()) => {
                    reversed += 1;
                    record(saga, SagaEvent::compensation_issued(leg));
                }
                Err(e) => {
                    tracing::error!(
                        item_id = %rollback.item_id(),
                        reference = rollback.reference(),
                        error = %e,
                        "compensation failed, manual reconciliation required"
                    );
                    record(saga, SagaEvent::compensation_failed(leg, e.to_string()));
                    unreversed.push(UnreversedLeg {
                        item_id: rollback.item_id().clone(),
                        domain: rollback.domain(),
                        reference: rollback.reference().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if unreversed.is_empty() {
            Reversal::FullyReversed { legs: reversed }
        } else {
            Reversal::PartiallyReversed {
                reversed,
                unreversed,
            }
        }
    }
}

/// Folds one finished leg into the phase outcome.
fn absorb(
    saga: &mut SagaInstance,
    domain: LegDomain,
    outcome: &mut PhaseOutcome,
    joined: Result<LegResult, JoinError>,
) {
    match joined {
        Ok((leg, item_id, Ok(receipt))) => {
            if receipt.is_success() {
                record(saga, SagaEvent::leg_succeeded(leg, reference(domain, &receipt)));
            } else {
                record(saga, SagaEvent::leg_failed(leg, receipt.error.clone()));
                outcome.failure.get_or_insert(SagaError::LegFailed {
                    item_id: item_id.clone(),
                    reason: receipt.error.clone(),
                });
            }
            if receipt.is_success() || receipt.has_applied_mutation() {
                outcome.applied.push(AppliedLeg {
                    leg,
                    item_id,
                    receipt,
                });
            }
        }
        Ok((leg, _, Err(e))) => {
            record(saga, SagaEvent::leg_failed(leg, e.to_string()));
            outcome.failure.get_or_insert(e);
        }
        Err(e) => {
            tracing::error!(error = %e, "leg task ended abnormally");
            outcome
                .failure
                .get_or_insert(SagaError::LegAborted(e.to_string()));
        }
    }
}

fn reference(domain: LegDomain, receipt: &TransferReceipt) -> &str {
    match domain {
        LegDomain::Wallet => &receipt.transaction_id,
        LegDomain::Inventory => &receipt.inventory_id,
    }
}

fn record(saga: &mut SagaInstance, event: SagaEvent) {
    tracing::debug!(event_type = event.event_type(), "saga event");
    saga.apply(event);
}
