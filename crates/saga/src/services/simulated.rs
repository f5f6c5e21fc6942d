//! Simulated wallet and inventory services for tests and local runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use common::{ItemId, PlayerId};
use futures_util::StreamExt;
use message_log::{
    CommandLog, InMemoryMessageLog, LogRecord, Offset, OutgoingRecord, PartitionRef, ResponseLog,
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::command::{InventoryCommand, InventoryRollback, WalletCommand, WalletRollback};
use crate::config::SagaConfig;
use crate::error::SagaError;
use crate::model::{LegDomain, TransferReceipt};
use crate::topics;

/// Error the wallet reports when a debit exceeds the balance.
pub const NOT_ENOUGH_MONEY: &str = "error: not enough money";

/// Error the inventory reports when selling an item the player lacks.
pub const ITEM_NOT_OWNED: &str = "error: item not in inventory";

#[derive(Debug, Default)]
struct DownstreamState {
    balances: HashMap<PlayerId, f64>,
    /// Applied wallet transactions: id -> (player, signed amount).
    transactions: BTreeMap<String, (PlayerId, f64)>,
    /// Owned items: inventory id -> (player, item).
    inventory: BTreeMap<String, (PlayerId, ItemId)>,
    failing_items: HashSet<(LegDomain, ItemId)>,
    silent_items: HashSet<ItemId>,
    next_id: u32,
    rollbacks_applied: usize,
}

impl DownstreamState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn failure_for(
        &self,
        domain: LegDomain,
        player_id: &PlayerId,
        item_id: &ItemId,
    ) -> Option<TransferReceipt> {
        let key = (domain, item_id.clone());
        self.failing_items.contains(&key).then(|| TransferReceipt {
            player_id: player_id.clone(),
            item_id: item_id.clone(),
            error: format!("error: {domain} refused item {item_id}"),
            ..Default::default()
        })
    }

    fn apply_wallet(&mut self, command: WalletCommand) -> TransferReceipt {
        if let Some(failure) =
            self.failure_for(LegDomain::Wallet, &command.player_id, &command.item_id)
        {
            return failure;
        }

        let balance = self.balances.entry(command.player_id.clone()).or_insert(0.0);
        if *balance + command.amount < 0.0 {
            return TransferReceipt {
                player_id: command.player_id,
                item_id: command.item_id,
                amount: command.amount,
                error: NOT_ENOUGH_MONEY.to_string(),
                ..Default::default()
            };
        }
        *balance += command.amount;

        let transaction_id = self.next_id("TX");
        self.transactions.insert(
            transaction_id.clone(),
            (command.player_id.clone(), command.amount),
        );
        TransferReceipt {
            transaction_id,
            player_id: command.player_id,
            item_id: command.item_id,
            amount: command.amount,
            ..Default::default()
        }
    }

    fn reverse_transaction(&mut self, transaction_id: &str) {
        if let Some((player_id, amount)) = self.transactions.remove(transaction_id) {
            *self.balances.entry(player_id).or_insert(0.0) -= amount;
            self.rollbacks_applied += 1;
        }
    }

    fn add_item(&mut self, command: InventoryCommand) -> TransferReceipt {
        if let Some(failure) =
            self.failure_for(LegDomain::Inventory, &command.player_id, &command.item_id)
        {
            return failure;
        }
        let inventory_id = self.next_id("INV");
        self.inventory.insert(
            inventory_id.clone(),
            (command.player_id.clone(), command.item_id.clone()),
        );
        TransferReceipt {
            inventory_id,
            player_id: command.player_id,
            item_id: command.item_id,
            ..Default::default()
        }
    }

    fn remove_item(&mut self, command: InventoryCommand) -> TransferReceipt {
        if let Some(failure) =
            self.failure_for(LegDomain::Inventory, &command.player_id, &command.item_id)
        {
            return failure;
        }
        let owned = self
            .inventory
            .iter()
            .find(|(_, (player, item))| *player == command.player_id && *item == command.item_id)
            .map(|(id, _)| id.clone());

        match owned {
            Some(inventory_id) => {
                self.inventory.remove(&inventory_id);
                TransferReceipt {
                    inventory_id,
                    player_id: command.player_id,
                    item_id: command.item_id,
                    ..Default::default()
                }
            }
            None => TransferReceipt {
                player_id: command.player_id,
                item_id: command.item_id,
                error: ITEM_NOT_OWNED.to_string(),
                ..Default::default()
            },
        }
    }
}

/// In-process stand-in for the wallet and inventory services.
///
/// Consumes the command topics of an [`InMemoryMessageLog`], applies
/// each command to its own balances and inventory, and answers forward
/// commands with a tagged receipt on the response topic. Rollback
/// commands are applied silently.
#[derive(Clone)]
pub struct SimulatedDownstream {
    state: Arc<RwLock<DownstreamState>>,
    log: InMemoryMessageLog,
    config: SagaConfig,
}

impl SimulatedDownstream {
    pub fn new(log: InMemoryMessageLog, config: SagaConfig) -> Self {
        Self {
            state: Arc::default(),
            log,
            config,
        }
    }

    /// Credits `amount` to the player's balance.
    pub async fn deposit(&self, player_id: &PlayerId, amount: f64) {
        *self
            .state
            .write()
            .await
            .balances
            .entry(player_id.clone())
            .or_insert(0.0) += amount;
    }

    pub async fn balance(&self, player_id: &PlayerId) -> f64 {
        self.state
            .read()
            .await
            .balances
            .get(player_id)
            .copied()
            .unwrap_or(0.0)
    }

    /// Puts an item into the player's inventory and returns its inventory id.
    pub async fn grant_item(&self, player_id: &PlayerId, item_id: &ItemId) -> String {
        let mut state = self.state.write().await;
        let inventory_id = state.next_id("INV");
        state
            .inventory
            .insert(inventory_id.clone(), (player_id.clone(), item_id.clone()));
        inventory_id
    }

    /// Number of copies of `item_id` the player owns.
    pub async fn item_count(&self, player_id: &PlayerId, item_id: &ItemId) -> usize {
        self.state
            .read()
            .await
            .inventory
            .values()
            .filter(|(player, item)| player == player_id && item == item_id)
            .count()
    }

    /// Number of wallet transactions currently applied.
    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    /// Number of rollbacks that reversed an applied mutation.
    pub async fn rollbacks_applied(&self) -> usize {
        self.state.read().await.rollbacks_applied
    }

    /// Makes the `domain` service report an error for commands on `item_id`.
    pub async fn set_failing_item(&self, domain: LegDomain, item_id: &ItemId, fail: bool) {
        let mut state = self.state.write().await;
        let key = (domain, item_id.clone());
        if fail {
            state.failing_items.insert(key);
        } else {
            state.failing_items.remove(&key);
        }
    }

    /// Makes both services apply nothing and never answer for `item_id`.
    pub async fn set_silent_item(&self, item_id: &ItemId, silent: bool) {
        let mut state = self.state.write().await;
        if silent {
            state.silent_items.insert(item_id.clone());
        } else {
            state.silent_items.remove(item_id);
        }
    }

    /// Starts consuming both command topics from the beginning.
    ///
    /// The returned handle runs until aborted.
    pub fn spawn(&self) -> JoinHandle<()> {
        let wallet = self.clone();
        let inventory = self.clone();
        tokio::spawn(async move {
            tokio::join!(
                wallet.consume(LegDomain::Wallet),
                inventory.consume(LegDomain::Inventory),
            );
        })
    }

    async fn consume(&self, domain: LegDomain) {
        let partition = PartitionRef::new(self.config.topic_for(domain), 0);
        let mut records = match self.log.read_from(&partition, Offset::beginning()).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(%partition, error = %e, "simulated service could not attach");
                return;
            }
        };

        while let Some(record) = records.next().await {
            match record {
                Ok(record) => {
                    if let Err(e) = self.handle(domain, &record).await {
                        tracing::warn!(%partition, offset = %record.offset, error = %e, "command dropped");
                    }
                }
                Err(e) => {
                    tracing::error!(%partition, error = %e, "simulated service detached");
                    return;
                }
            }
        }
    }

    async fn handle(&self, domain: LegDomain, record: &LogRecord) -> Result<(), SagaError> {
        let reply = {
            let mut state = self.state.write().await;
            match (domain, record.key.as_str()) {
                (LegDomain::Wallet, topics::KEY_BUY | topics::KEY_SELL) => {
                    let command: WalletCommand = record.decode()?;
                    if state.silent_items.contains(&command.item_id) {
                        None
                    } else {
                        Some(state.apply_wallet(command))
                    }
                }
                (LegDomain::Wallet, topics::KEY_ROLLBACK_TRANSACTION) => {
                    let rollback: WalletRollback = record.decode()?;
                    state.reverse_transaction(&rollback.transaction_id);
                    None
                }
                (LegDomain::Inventory, topics::KEY_BUY | topics::KEY_SELL) => {
                    let command: InventoryCommand = record.decode()?;
                    if state.silent_items.contains(&command.item_id) {
                        None
                    } else if record.key == topics::KEY_BUY {
                        Some(state.add_item(command))
                    } else {
                        Some(state.remove_item(command))
                    }
                }
                (LegDomain::Inventory, topics::KEY_ROLLBACK_REMOVE) => {
                    let rollback: InventoryRollback = record.decode()?;
                    if state.inventory.remove(&rollback.inventory_id).is_some() {
                        state.rollbacks_applied += 1;
                    }
                    None
                }
                (LegDomain::Inventory, topics::KEY_ROLLBACK_ADD) => {
                    let rollback: InventoryRollback = record.decode()?;
                    state.inventory.insert(
                        rollback.inventory_id,
                        (rollback.player_id, rollback.item_id),
                    );
                    state.rollbacks_applied += 1;
                    None
                }
                (_, key) => {
                    tracing::warn!(%domain, key, "unknown operation key");
                    None
                }
            }
        };

        let (Some(receipt), Some(tag)) = (reply, record.correlation_tag.as_deref()) else {
            return Ok(());
        };
        let response = OutgoingRecord::json(
            &self.config.response_partition.topic,
            &record.key,
            &receipt,
        )?
        .with_tag(tag);
        self.log.append(response).await?;
        Ok(())
    }
}
