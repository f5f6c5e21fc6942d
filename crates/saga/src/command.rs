//! Commands appended to the wallet and inventory topics.

use common::{ItemId, PlayerId};
use message_log::OutgoingRecord;
use serde::{Deserialize, Serialize};

use crate::config::SagaConfig;
use crate::error::Result;
use crate::model::{LegDomain, LineItem, Operation, TransferReceipt};
use crate::tag::CorrelationTag;
use crate::topics;

/// Wallet mutation: debit (negative amount) or credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletCommand {
    pub player_id: PlayerId,
    /// Echoed back in the receipt.
    #[serde(default)]
    pub item_id: ItemId,
    pub amount: f64,
}

/// Inventory mutation: add (buy) or remove (sell) one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCommand {
    pub player_id: PlayerId,
    pub item_id: ItemId,
}

/// Reverses a wallet transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRollback {
    pub transaction_id: String,
    #[serde(default)]
    pub player_id: PlayerId,
    #[serde(default)]
    pub item_id: ItemId,
}

/// Reverses an inventory add or remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRollback {
    pub inventory_id: String,
    pub player_id: PlayerId,
    pub item_id: ItemId,
}

/// A command ready to be appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub topic: String,
    pub operation_key: String,
    pub payload: serde_json::Value,
    /// Forward commands are tagged; compensating commands expect no receipt.
    pub tag: Option<CorrelationTag>,
}

impl Command {
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        operation_key: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self {
            topic: topic.into(),
            operation_key: operation_key.into(),
            payload: serde_json::to_value(payload)?,
            tag: None,
        })
    }

    pub fn with_tag(mut self, tag: CorrelationTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Builds the forward command for one leg of a priced line item.
    pub fn for_leg(
        config: &SagaConfig,
        domain: LegDomain,
        operation: Operation,
        player_id: &PlayerId,
        line: &LineItem,
        tag: CorrelationTag,
    ) -> Result<Self> {
        let topic = config.topic_for(domain);
        let command = match domain {
            LegDomain::Wallet => Self::new(
                topic,
                operation.key(),
                &WalletCommand {
                    player_id: player_id.clone(),
                    item_id: line.item_id().clone(),
                    amount: operation.wallet_amount(line.priced()?),
                },
            )?,
            LegDomain::Inventory => Self::new(
                topic,
                operation.key(),
                &InventoryCommand {
                    player_id: player_id.clone(),
                    item_id: line.item_id().clone(),
                },
            )?,
        };
        Ok(command.with_tag(tag))
    }

    pub fn to_record(&self) -> Result<OutgoingRecord> {
        let record = OutgoingRecord::json(&self.topic, &self.operation_key, &self.payload)?;
        Ok(match &self.tag {
            Some(tag) => record.with_tag(tag.as_str()),
            None => record,
        })
    }
}

/// Undoes one successfully applied leg.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackRequest {
    Transaction {
        transaction_id: String,
        player_id: PlayerId,
        item_id: ItemId,
    },
    Inventory {
        inventory_id: String,
        player_id: PlayerId,
        item_id: ItemId,
        /// The forward operation being undone.
        reverses: Operation,
    },
}

impl RollbackRequest {
    /// Derives the rollback for a leg from its receipt.
    ///
    /// Returns None when the receipt names no mutation to undo.
    pub fn for_leg(
        domain: LegDomain,
        operation: Operation,
        player_id: &PlayerId,
        item_id: &ItemId,
        receipt: &TransferReceipt,
    ) -> Option<Self> {
        match domain {
            LegDomain::Wallet if !receipt.transaction_id.is_empty() => {
                Some(RollbackRequest::Transaction {
                    transaction_id: receipt.transaction_id.clone(),
                    player_id: player_id.clone(),
                    item_id: item_id.clone(),
                })
            }
            LegDomain::Inventory if !receipt.inventory_id.is_empty() => {
                Some(RollbackRequest::Inventory {
                    inventory_id: receipt.inventory_id.clone(),
                    player_id: player_id.clone(),
                    item_id: item_id.clone(),
                    reverses: operation,
                })
            }
            _ => None,
        }
    }

    pub fn domain(&self) -> LegDomain {
        match self {
            RollbackRequest::Transaction { .. } => LegDomain::Wallet,
            RollbackRequest::Inventory { .. } => LegDomain::Inventory,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            RollbackRequest::Transaction { item_id, .. }
            | RollbackRequest::Inventory { item_id, .. } => item_id,
        }
    }

    /// Transaction id or inventory id being reversed.
    pub fn reference(&self) -> &str {
        match self {
            RollbackRequest::Transaction { transaction_id, .. } => transaction_id,
            RollbackRequest::Inventory { inventory_id, .. } => inventory_id,
        }
    }

    pub fn operation_key(&self) -> &'static str {
        match self {
            RollbackRequest::Transaction { .. } => topics::KEY_ROLLBACK_TRANSACTION,
            RollbackRequest::Inventory {
                reverses: Operation::Buy,
                ..
            } => topics::KEY_ROLLBACK_REMOVE,
            RollbackRequest::Inventory {
                reverses: Operation::Sell,
                ..
            } => topics::KEY_ROLLBACK_ADD,
        }
    }

    /// Builds the compensating command.
    pub fn to_command(&self, config: &SagaConfig) -> Result<Command> {
        let topic = config.topic_for(self.domain());
        match self {
            RollbackRequest::Transaction {
                transaction_id,
                player_id,
                item_id,
            } => Command::new(
                topic,
                self.operation_key(),
                &WalletRollback {
                    transaction_id: transaction_id.clone(),
                    player_id: player_id.clone(),
                    item_id: item_id.clone(),
                },
            ),
            RollbackRequest::Inventory {
                inventory_id,
                player_id,
                item_id,
                ..
            } => Command::new(
                topic,
                self.operation_key(),
                &InventoryRollback {
                    inventory_id: inventory_id.clone(),
                    player_id: player_id.clone(),
                    item_id: item_id.clone(),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(item: &str, price: f64) -> LineItem {
        let mut line = LineItem::new(item);
        line.stamp_price(price).unwrap();
        line
    }

    #[test]
    fn buy_wallet_leg_debits_catalog_price() {
        let config = SagaConfig::default();
        let command = Command::for_leg(
            &config,
            LegDomain::Wallet,
            Operation::Buy,
            &PlayerId::new("p1"),
            &priced("A", 10.0),
            CorrelationTag::from("tag-1"),
        )
        .unwrap();

        assert_eq!(command.topic, "player");
        assert_eq!(command.operation_key, "buy");
        assert_eq!(command.payload["amount"], -10.0);
        assert_eq!(command.payload["player_id"], "p1");

        let record = command.to_record().unwrap();
        assert_eq!(record.correlation_tag.as_deref(), Some("tag-1"));
        assert_eq!(record.key, "buy");
    }

    #[test]
    fn sell_inventory_leg_targets_inventory_topic() {
        let config = SagaConfig::default();
        let command = Command::for_leg(
            &config,
            LegDomain::Inventory,
            Operation::Sell,
            &PlayerId::new("p1"),
            &priced("A", 10.0),
            CorrelationTag::from("tag-2"),
        )
        .unwrap();

        assert_eq!(command.topic, "inventory");
        assert_eq!(command.operation_key, "sell");
        assert_eq!(command.payload["item_id"], "A");
        assert!(command.payload.get("amount").is_none());
    }

    #[test]
    fn unpriced_wallet_leg_is_refused() {
        let result = Command::for_leg(
            &SagaConfig::default(),
            LegDomain::Wallet,
            Operation::Buy,
            &PlayerId::new("p1"),
            &LineItem::new("A"),
            CorrelationTag::from("tag-3"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rollback_keys_follow_the_reversed_operation() {
        let player = PlayerId::new("p1");
        let item = ItemId::new("A");
        let receipt = TransferReceipt {
            transaction_id: "t1".into(),
            inventory_id: "i1".into(),
            ..Default::default()
        };

        let wallet =
            RollbackRequest::for_leg(LegDomain::Wallet, Operation::Buy, &player, &item, &receipt)
                .unwrap();
        assert_eq!(wallet.operation_key(), "rtransaction");
        assert_eq!(wallet.reference(), "t1");

        let undo_add =
            RollbackRequest::for_leg(LegDomain::Inventory, Operation::Buy, &player, &item, &receipt)
                .unwrap();
        assert_eq!(undo_add.operation_key(), "rremove");

        let undo_remove = RollbackRequest::for_leg(
            LegDomain::Inventory,
            Operation::Sell,
            &player,
            &item,
            &receipt,
        )
        .unwrap();
        assert_eq!(undo_remove.operation_key(), "radd");
        assert_eq!(undo_remove.reference(), "i1");
    }

    #[test]
    fn receipt_without_ids_needs_no_rollback() {
        let receipt = TransferReceipt {
            error: "error: not enough money".into(),
            ..Default::default()
        };
        assert!(
            RollbackRequest::for_leg(
                LegDomain::Wallet,
                Operation::Buy,
                &PlayerId::new("p1"),
                &ItemId::new("A"),
                &receipt
            )
            .is_none()
        );
    }

    #[test]
    fn rollback_command_is_untagged() {
        let rollback = RollbackRequest::Transaction {
            transaction_id: "t1".into(),
            player_id: PlayerId::new("p1"),
            item_id: ItemId::new("A"),
        };
        let command = rollback.to_command(&SagaConfig::default()).unwrap();
        assert_eq!(command.topic, "player");
        assert_eq!(command.payload["transaction_id"], "t1");
        assert!(command.to_record().unwrap().correlation_tag.is_none());
    }
}
