//! Integration tests for buy and sell sagas over the in-memory log.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{ItemId, PlayerId};
use message_log::{InMemoryMessageLog, InMemoryOffsetStore, Offset, OffsetStore};
use saga::{
    CatalogItem, Command, CommandPublisher, CompensationExecutor, CorrelationTag, InMemoryCatalog,
    LegDomain, LegStatus, LogCommandPublisher, LogResponseCorrelator, Operation, PurchaseRequest,
    ResponseCorrelator, Reversal, RollbackRequest, SagaConfig, SagaCoordinator, SagaError,
    SagaState, SimulatedDownstream, never_cancelled, topics,
};

/// Publisher that fails forward commands from the n-th on, or every rollback.
struct FlakyPublisher {
    inner: LogCommandPublisher<InMemoryMessageLog>,
    fail_forward_from: Option<usize>,
    fail_rollbacks: bool,
    forward_seen: AtomicUsize,
}

#[async_trait]
impl CommandPublisher for FlakyPublisher {
    async fn publish(&self, command: &Command) -> Result<Offset, SagaError> {
        let refuse = if command.tag.is_some() {
            let n = self.forward_seen.fetch_add(1, Ordering::SeqCst) + 1;
            self.fail_forward_from.is_some_and(|from| n >= from)
        } else {
            self.fail_rollbacks
        };

        if refuse {
            return Err(SagaError::CommandPublishFailed {
                topic: command.topic.clone(),
                reason: "broker unavailable".to_string(),
            });
        }
        self.inner.publish(command).await
    }
}

type TestCoordinator = SagaCoordinator<
    InMemoryCatalog,
    Arc<dyn CommandPublisher>,
    LogResponseCorrelator<InMemoryMessageLog, InMemoryOffsetStore>,
>;

struct TestHarness {
    coordinator: TestCoordinator,
    config: SagaConfig,
    log: InMemoryMessageLog,
    offsets: InMemoryOffsetStore,
    downstream: SimulatedDownstream,
    consumer: tokio::task::JoinHandle<()>,
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

impl TestHarness {
    fn new() -> Self {
        Self::build(|log| Arc::new(LogCommandPublisher::new(log.clone())))
    }

    fn with_flaky(fail_forward_from: Option<usize>, fail_rollbacks: bool) -> Self {
        Self::build(|log| {
            Arc::new(FlakyPublisher {
                inner: LogCommandPublisher::new(log.clone()),
                fail_forward_from,
                fail_rollbacks,
                forward_seen: AtomicUsize::new(0),
            })
        })
    }

    fn build(publisher: impl FnOnce(&InMemoryMessageLog) -> Arc<dyn CommandPublisher>) -> Self {
        let config = SagaConfig::default().with_response_timeout(Duration::from_secs(2));
        let log = InMemoryMessageLog::new();
        let offsets = InMemoryOffsetStore::new();

        let coordinator = Self::coordinator(&config, &log, &offsets, publisher(&log));
        let downstream = SimulatedDownstream::new(log.clone(), config.clone());
        let consumer = downstream.spawn();

        Self {
            coordinator,
            config,
            log,
            offsets,
            downstream,
            consumer,
        }
    }

    fn coordinator(
        config: &SagaConfig,
        log: &InMemoryMessageLog,
        offsets: &InMemoryOffsetStore,
        publisher: Arc<dyn CommandPublisher>,
    ) -> TestCoordinator {
        let catalog = InMemoryCatalog::with_items([
            CatalogItem::new("A", "Sword", 10.0),
            CatalogItem::new("B", "Shield", 5.0),
        ]);
        SagaCoordinator::new(
            config.clone(),
            catalog,
            publisher,
            LogResponseCorrelator::new(log.clone(), offsets.clone(), config.offset_key()),
        )
    }

    /// Simulates a coordinator restart against the same log and offsets.
    fn restarted(&self) -> TestCoordinator {
        Self::coordinator(
            &self.config,
            &self.log,
            &self.offsets,
            Arc::new(LogCommandPublisher::new(self.log.clone())),
        )
    }

    async fn keys(&self, topic: &str) -> Vec<String> {
        self.log
            .records(topic)
            .await
            .into_iter()
            .map(|r| r.key)
            .collect()
    }

    async fn wait_for_rollbacks(&self, expected: usize) {
        for _ in 0..200 {
            if self.downstream.rollbacks_applied().await >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {expected} rollbacks to be applied");
    }
}

fn player() -> PlayerId {
    PlayerId::new("player-1")
}

#[tokio::test]
async fn test_all_legs_succeed_one_receipt_per_line_in_order() {
    let h = TestHarness::new();
    h.downstream.deposit(&player(), 100.0).await;

    let receipts = h
        .coordinator
        .buy_items(
            player(),
            vec![ItemId::new("B"), ItemId::new("A"), ItemId::new("B")],
        )
        .await
        .unwrap();

    let items: Vec<_> = receipts.iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(items, vec!["B", "A", "B"]);
    assert!(receipts.iter().all(|r| r.is_success()));
    assert!(receipts.iter().all(|r| !r.transaction_id.is_empty()));
    assert!(receipts.iter().all(|r| !r.inventory_id.is_empty()));
    assert_eq!(receipts[1].amount, -10.0);

    assert_eq!(h.downstream.balance(&player()).await, 80.0);
    assert_eq!(h.downstream.item_count(&player(), &ItemId::new("B")).await, 2);
}

#[tokio::test]
async fn test_insufficient_funds_rolls_back_the_paid_leg() {
    let h = TestHarness::new();
    h.downstream.deposit(&player(), 12.0).await;

    let report = h
        .coordinator
        .run(PurchaseRequest::buy(player(), ["A", "B"]), never_cancelled())
        .await;

    let (reason, reversal) = match report.result {
        Err(SagaError::Failed { reason, reversal }) => (reason, reversal),
        other => panic!("expected Failed, got {other:?}"),
    };
    assert!(reason.contains("not enough money"));
    assert_eq!(reversal, Reversal::FullyReversed { legs: 1 });
    assert_eq!(report.instance.state(), SagaState::Failed);

    // One rollback, for A's transaction, and no inventory commands at all.
    let paid = &report.instance.legs()[0];
    assert_eq!(paid.status, LegStatus::Compensated);
    let records = h.log.records(topics::PLAYER_TOPIC).await;
    let rollbacks: Vec<_> = records
        .iter()
        .filter(|r| r.key == topics::KEY_ROLLBACK_TRANSACTION)
        .collect();
    assert_eq!(rollbacks.len(), 1);
    let payload: serde_json::Value = rollbacks[0].decode().unwrap();
    assert_eq!(payload["transaction_id"], paid.reference.clone().unwrap());
    assert_eq!(h.log.record_count(topics::INVENTORY_TOPIC).await, 0);

    h.wait_for_rollbacks(1).await;
    assert_eq!(h.downstream.balance(&player()).await, 12.0);
}

#[tokio::test]
async fn test_unknown_item_is_rejected_with_no_records() {
    let h = TestHarness::new();
    h.downstream
        .grant_item(&player(), &ItemId::new("A"))
        .await;

    let report = h
        .coordinator
        .run(PurchaseRequest::sell(player(), ["A", "C"]), never_cancelled())
        .await;

    match report.result {
        Err(SagaError::ItemsNotFound { missing }) => assert_eq!(missing, vec![ItemId::new("C")]),
        other => panic!("expected ItemsNotFound, got {other:?}"),
    }
    assert_eq!(report.instance.state(), SagaState::Rejected);
    assert_eq!(h.log.total_record_count().await, 0);
}

#[tokio::test]
async fn test_timed_out_leg_is_not_compensated() {
    let config = SagaConfig::default().with_response_timeout(Duration::from_millis(200));
    let log = InMemoryMessageLog::new();
    let offsets = InMemoryOffsetStore::new();
    let coordinator = TestHarness::coordinator(
        &config,
        &log,
        &offsets,
        Arc::new(LogCommandPublisher::new(log.clone())),
    );
    let downstream = SimulatedDownstream::new(log.clone(), config);
    downstream.deposit(&player(), 100.0).await;
    downstream.set_silent_item(&ItemId::new("B"), true).await;
    let consumer = downstream.spawn();

    let report = coordinator
        .run(PurchaseRequest::buy(player(), ["A", "B"]), never_cancelled())
        .await;

    match &report.result {
        Err(SagaError::Failed { reason, reversal }) => {
            assert!(reason.contains("No receipt"));
            assert_eq!(*reversal, Reversal::FullyReversed { legs: 1 });
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    let failed: Vec<_> = report
        .instance
        .legs_with(LegStatus::Failed)
        .map(|l| l.leg.index)
        .collect();
    assert_eq!(failed, vec![1]);

    let rollbacks = log
        .records(topics::PLAYER_TOPIC)
        .await
        .into_iter()
        .filter(|r| r.key == topics::KEY_ROLLBACK_TRANSACTION)
        .count();
    assert_eq!(rollbacks, 1);

    consumer.abort();
}

#[tokio::test]
async fn test_publish_failure_stops_dispatch_and_reverses_earlier_legs() {
    let h = TestHarness::with_flaky(Some(2), false);
    h.downstream.deposit(&player(), 100.0).await;

    let report = h
        .coordinator
        .run(PurchaseRequest::buy(player(), ["A", "B", "A"]), never_cancelled())
        .await;

    match &report.result {
        Err(SagaError::Failed { reason, reversal }) => {
            assert!(reason.contains("broker unavailable"));
            assert_eq!(*reversal, Reversal::FullyReversed { legs: 1 });
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    // Only the first leg reached the log; the third was never dispatched.
    assert_eq!(h.keys(topics::PLAYER_TOPIC).await, vec!["buy", "rtransaction"]);
    assert_eq!(report.instance.legs().len(), 2);
}

#[tokio::test]
async fn test_publish_failure_on_first_leg_needs_no_compensation() {
    let h = TestHarness::with_flaky(Some(1), false);

    let err = h
        .coordinator
        .buy_items(player(), vec![ItemId::new("A")])
        .await
        .unwrap_err();

    assert_eq!(err.reversal(), Some(&Reversal::NotNeeded));
    assert!(err.is_retryable());
    assert_eq!(h.log.total_record_count().await, 0);
}

#[tokio::test]
async fn test_failed_rollback_is_surfaced_for_reconciliation() {
    let h = TestHarness::with_flaky(None, true);
    h.downstream.deposit(&player(), 12.0).await;

    let report = h
        .coordinator
        .run(PurchaseRequest::buy(player(), ["A", "B"]), never_cancelled())
        .await;

    let err = report.result.unwrap_err();
    match err.reversal() {
        Some(Reversal::PartiallyReversed {
            reversed,
            unreversed,
        }) => {
            assert_eq!(*reversed, 0);
            assert_eq!(unreversed.len(), 1);
            assert_eq!(unreversed[0].item_id, ItemId::new("A"));
            assert_eq!(unreversed[0].domain, LegDomain::Wallet);
            assert!(unreversed[0].reference.starts_with("TX-"));
        }
        other => panic!("expected PartiallyReversed, got {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(
        report.instance.legs_with(LegStatus::CompensationFailed).count(),
        1
    );
    assert_eq!(report.instance.state(), SagaState::Failed);
}

#[tokio::test]
async fn test_consumed_receipts_are_not_replayed_after_restart() {
    let h = TestHarness::new();
    h.downstream.deposit(&player(), 100.0).await;

    h.coordinator
        .buy_items(player(), vec![ItemId::new("A")])
        .await
        .unwrap();

    let responses = h.log.record_count(topics::PAYMENT_TOPIC).await as i64;
    assert_eq!(
        h.offsets.load(&h.config.offset_key()).await.unwrap(),
        Some(Offset::new(responses))
    );

    // A restarted correlator starts after the consumed receipts: re-awaiting
    // an old tag finds nothing.
    let wallet_tag = h.log.records(topics::PAYMENT_TOPIC).await[0]
        .correlation_tag
        .clone()
        .unwrap();
    let correlator = LogResponseCorrelator::new(
        h.log.clone(),
        h.offsets.clone(),
        h.config.offset_key(),
    );
    let from = correlator.checkpoint().await.unwrap();
    assert_eq!(from, Offset::new(responses));
    let replay = correlator
        .await_receipt(
            &CorrelationTag::from(wallet_tag.as_str()),
            from,
            Duration::from_millis(100),
        )
        .await;
    assert!(matches!(replay, Err(SagaError::ResponseTimeout { .. })));

    let restarted = h.restarted();
    restarted
        .buy_items(player(), vec![ItemId::new("B")])
        .await
        .unwrap();

    assert_eq!(h.downstream.transaction_count().await, 2);
    assert_eq!(h.downstream.rollbacks_applied().await, 0);
    assert_eq!(h.downstream.balance(&player()).await, 85.0);
}

#[tokio::test]
async fn test_cancellation_compensates_known_successes() {
    let h = TestHarness::new();
    h.downstream.deposit(&player(), 100.0).await;
    h.downstream.set_silent_item(&ItemId::new("B"), true).await;

    let cancel = Box::pin(tokio::time::sleep(Duration::from_millis(300)));
    let report = h
        .coordinator
        .run(PurchaseRequest::buy(player(), ["A", "B"]), cancel)
        .await;

    match report.result {
        Err(SagaError::Cancelled { reversal }) => {
            assert_eq!(reversal, Reversal::FullyReversed { legs: 1 });
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(report.instance.state(), SagaState::Failed);

    h.wait_for_rollbacks(1).await;
    assert_eq!(h.downstream.balance(&player()).await, 100.0);
}

#[tokio::test]
async fn test_sell_removes_items_then_credits() {
    let h = TestHarness::new();
    h.downstream.grant_item(&player(), &ItemId::new("A")).await;
    h.downstream.grant_item(&player(), &ItemId::new("B")).await;

    let receipts = h
        .coordinator
        .sell_items(player(), vec![ItemId::new("A"), ItemId::new("B")])
        .await
        .unwrap();

    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0].amount, 10.0);
    assert_eq!(receipts[1].amount, 5.0);
    assert_eq!(h.downstream.balance(&player()).await, 15.0);
    assert_eq!(h.downstream.item_count(&player(), &ItemId::new("A")).await, 0);

    // Inventory is touched before the wallet.
    assert_eq!(h.keys(topics::INVENTORY_TOPIC).await, vec!["sell", "sell"]);
    assert_eq!(h.keys(topics::PLAYER_TOPIC).await, vec!["sell", "sell"]);
}

#[tokio::test]
async fn test_selling_unowned_item_re_adds_the_removed_one() {
    let h = TestHarness::new();
    let owned = h.downstream.grant_item(&player(), &ItemId::new("A")).await;

    let err = h
        .coordinator
        .sell_items(player(), vec![ItemId::new("A"), ItemId::new("B")])
        .await
        .unwrap_err();

    assert_eq!(err.reversal(), Some(&Reversal::FullyReversed { legs: 1 }));
    assert_eq!(h.log.record_count(topics::PLAYER_TOPIC).await, 0);

    h.wait_for_rollbacks(1).await;
    assert_eq!(h.downstream.item_count(&player(), &ItemId::new("A")).await, 1);
    let readded = h.log.records(topics::INVENTORY_TOPIC).await;
    let payload: serde_json::Value = readded
        .iter()
        .find(|r| r.key == topics::KEY_ROLLBACK_ADD)
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(payload["inventory_id"], owned);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sagas_for_one_player_do_not_cross_correlate() {
    let h = Arc::new(TestHarness::new());
    h.downstream.deposit(&player(), 1_000.0).await;

    let mut sagas = Vec::new();
    for i in 0..8 {
        let h = Arc::clone(&h);
        let item = if i % 2 == 0 { "A" } else { "B" };
        sagas.push(tokio::spawn(async move {
            h.coordinator.buy_items(player(), vec![ItemId::new(item)]).await
        }));
    }

    let mut transactions = Vec::new();
    for saga in sagas {
        let receipts = saga.await.unwrap().unwrap();
        transactions.push(receipts[0].transaction_id.clone());
    }
    transactions.sort();
    transactions.dedup();
    assert_eq!(transactions.len(), 8);

    assert_eq!(h.downstream.balance(&player()).await, 1_000.0 - 4.0 * 10.0 - 4.0 * 5.0);
    assert_eq!(h.downstream.rollbacks_applied().await, 0);
}

/// Buys A and B, then reverses all four legs in the given order.
async fn reverse_purchase_in_order(reversed_first: bool) -> (f64, usize, usize) {
    let h = TestHarness::new();
    h.downstream.deposit(&player(), 100.0).await;

    let receipts = h
        .coordinator
        .buy_items(player(), vec![ItemId::new("A"), ItemId::new("B")])
        .await
        .unwrap();

    let mut rollbacks = Vec::new();
    for receipt in &receipts {
        for domain in [LegDomain::Wallet, LegDomain::Inventory] {
            rollbacks.extend(RollbackRequest::for_leg(
                domain,
                Operation::Buy,
                &player(),
                &receipt.item_id,
                receipt,
            ));
        }
    }
    assert_eq!(rollbacks.len(), 4);
    if reversed_first {
        rollbacks.reverse();
    }

    let executor = CompensationExecutor::new(
        Arc::new(LogCommandPublisher::new(h.log.clone())),
        h.config.clone(),
    );
    for rollback in &rollbacks {
        executor.compensate(rollback).await.unwrap();
    }
    h.wait_for_rollbacks(4).await;

    (
        h.downstream.balance(&player()).await,
        h.downstream.item_count(&player(), &ItemId::new("A")).await,
        h.downstream.item_count(&player(), &ItemId::new("B")).await,
    )
}

#[tokio::test]
async fn test_rollback_order_does_not_change_the_reversed_state() {
    let forward = reverse_purchase_in_order(false).await;
    let backward = reverse_purchase_in_order(true).await;

    assert_eq!(forward, (100.0, 0, 0));
    assert_eq!(forward, backward);
}
