//! Requests, line items and receipts.

use std::collections::BTreeSet;

use common::{ItemId, PlayerId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::topics;

/// Direction of a purchase saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Buy,
    Sell,
}

impl Operation {
    /// Operation key used on forward commands.
    pub fn key(&self) -> &'static str {
        match self {
            Operation::Buy => topics::KEY_BUY,
            Operation::Sell => topics::KEY_SELL,
        }
    }

    /// The two phases in execution order.
    ///
    /// Buying debits the wallet before adding items; selling removes items
    /// before crediting the wallet.
    pub fn phases(&self) -> [LegDomain; 2] {
        match self {
            Operation::Buy => [LegDomain::Wallet, LegDomain::Inventory],
            Operation::Sell => [LegDomain::Inventory, LegDomain::Wallet],
        }
    }

    /// Signed wallet amount for a line priced at `price`.
    pub fn wallet_amount(&self, price: f64) -> f64 {
        match self {
            Operation::Buy => -price,
            Operation::Sell => price,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Downstream service a leg mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegDomain {
    Wallet,
    Inventory,
}

impl LegDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegDomain::Wallet => "wallet",
            LegDomain::Inventory => "inventory",
        }
    }
}

impl std::fmt::Display for LegDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of a purchase request.
///
/// The unit price is stamped once from the catalog; client-supplied
/// prices are never trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    item_id: ItemId,
    unit_price: Option<f64>,
}

impl LineItem {
    pub fn new(item_id: impl Into<ItemId>) -> Self {
        Self {
            item_id: item_id.into(),
            unit_price: None,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    /// Catalog price, if the line has been priced.
    pub fn unit_price(&self) -> Option<f64> {
        self.unit_price
    }

    /// Stamps the catalog price.
    ///
    /// Fails if the price is not a finite non-negative number, or if a
    /// different price was already stamped.
    pub fn stamp_price(&mut self, price: f64) -> Result<()> {
        if !price.is_finite() || price < 0.0 {
            return Err(SagaError::PricingMismatch {
                item_id: self.item_id.clone(),
                reason: format!("catalog price {price} is not a valid amount"),
            });
        }
        match self.unit_price {
            Some(existing) if existing != price => Err(SagaError::PricingMismatch {
                item_id: self.item_id.clone(),
                reason: format!("already priced at {existing}, catalog now says {price}"),
            }),
            _ => {
                self.unit_price = Some(price);
                Ok(())
            }
        }
    }

    /// Returns the stamped price or fails if the line was never priced.
    pub fn priced(&self) -> Result<f64> {
        self.unit_price.ok_or_else(|| SagaError::PricingMismatch {
            item_id: self.item_id.clone(),
            reason: "line item was never priced".to_string(),
        })
    }
}

/// A buy or sell of several items by one player.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRequest {
    pub player_id: PlayerId,
    pub operation: Operation,
    pub items: Vec<LineItem>,
}

impl PurchaseRequest {
    pub fn new<I, T>(player_id: impl Into<PlayerId>, operation: Operation, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ItemId>,
    {
        Self {
            player_id: player_id.into(),
            operation,
            items: items.into_iter().map(LineItem::new).collect(),
        }
    }

    pub fn buy<I, T>(player_id: impl Into<PlayerId>, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ItemId>,
    {
        Self::new(player_id, Operation::Buy, items)
    }

    pub fn sell<I, T>(player_id: impl Into<PlayerId>, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ItemId>,
    {
        Self::new(player_id, Operation::Sell, items)
    }

    /// Checks the request can be executed at all.
    pub fn validate(&self) -> Result<()> {
        if self.player_id.is_blank() {
            return Err(SagaError::InvalidRequest("player id is empty".to_string()));
        }
        if self.items.is_empty() {
            return Err(SagaError::InvalidRequest("no items requested".to_string()));
        }
        if let Some(blank) = self.items.iter().position(|i| i.item_id.as_str().trim().is_empty()) {
            return Err(SagaError::InvalidRequest(format!(
                "item id at position {blank} is empty"
            )));
        }
        Ok(())
    }

    /// Distinct item ids, in a stable order.
    pub fn distinct_item_ids(&self) -> BTreeSet<ItemId> {
        self.items.iter().map(|i| i.item_id.clone()).collect()
    }
}

/// Outcome of one leg as reported by the wallet or inventory service.
///
/// The coordinator also returns one merged receipt per line item, filled
/// in from both phases.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferReceipt {
    #[serde(default)]
    pub inventory_id: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub player_id: PlayerId,
    #[serde(default)]
    pub item_id: ItemId,
    #[serde(default)]
    pub amount: f64,
    /// Empty on success.
    #[serde(default)]
    pub error: String,
}

impl TransferReceipt {
    /// Empty receipt for a line item, to be filled in as legs succeed.
    pub fn for_line(player_id: &PlayerId, item_id: &ItemId) -> Self {
        Self {
            player_id: player_id.clone(),
            item_id: item_id.clone(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }

    /// True if the service reports a durable mutation that must be
    /// compensated should the saga fail.
    pub fn has_applied_mutation(&self) -> bool {
        !self.transaction_id.is_empty() || !self.inventory_id.is_empty()
    }

    /// Copies the result of a successful leg into this merged receipt.
    pub fn merge_leg(&mut self, domain: LegDomain, leg: &TransferReceipt) {
        match domain {
            LegDomain::Wallet => {
                self.transaction_id = leg.transaction_id.clone();
                self.amount = leg.amount;
            }
            LegDomain::Inventory => {
                self.inventory_id = leg.inventory_id.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_debits_wallet_first() {
        assert_eq!(
            Operation::Buy.phases(),
            [LegDomain::Wallet, LegDomain::Inventory]
        );
        assert_eq!(Operation::Buy.wallet_amount(10.0), -10.0);
    }

    #[test]
    fn sell_removes_inventory_first() {
        assert_eq!(
            Operation::Sell.phases(),
            [LegDomain::Inventory, LegDomain::Wallet]
        );
        assert_eq!(Operation::Sell.wallet_amount(10.0), 10.0);
    }

    #[test]
    fn price_is_stamped_once() {
        let mut line = LineItem::new("A");
        assert!(line.priced().is_err());

        line.stamp_price(10.0).unwrap();
        line.stamp_price(10.0).unwrap();
        assert_eq!(line.unit_price(), Some(10.0));

        let err = line.stamp_price(12.0).unwrap_err();
        assert!(matches!(err, SagaError::PricingMismatch { .. }));
        assert_eq!(line.unit_price(), Some(10.0));
    }

    #[test]
    fn invalid_prices_are_refused() {
        let mut line = LineItem::new("A");
        assert!(line.stamp_price(-1.0).is_err());
        assert!(line.stamp_price(f64::NAN).is_err());
        assert_eq!(line.unit_price(), None);
    }

    #[test]
    fn validate_rejects_empty_requests() {
        let empty: Vec<&str> = vec![];
        assert!(PurchaseRequest::buy("p1", empty).validate().is_err());
        assert!(PurchaseRequest::buy("", ["A"]).validate().is_err());
        assert!(PurchaseRequest::buy("p1", ["A", " "]).validate().is_err());
        assert!(PurchaseRequest::buy("p1", ["A"]).validate().is_ok());
    }

    #[test]
    fn distinct_ids_collapse_duplicates() {
        let request = PurchaseRequest::buy("p1", ["B", "A", "B"]);
        let ids: Vec<_> = request.distinct_item_ids().into_iter().collect();
        assert_eq!(ids, vec![ItemId::new("A"), ItemId::new("B")]);
        assert_eq!(request.items.len(), 3);
    }

    #[test]
    fn receipt_decodes_with_missing_fields() {
        let receipt: TransferReceipt =
            serde_json::from_str(r#"{"transaction_id":"t1","player_id":"p1","amount":-10}"#)
                .unwrap();
        assert!(receipt.is_success());
        assert!(receipt.has_applied_mutation());
        assert_eq!(receipt.inventory_id, "");
    }

    #[test]
    fn merge_fills_both_phases() {
        let mut merged = TransferReceipt::for_line(&PlayerId::new("p1"), &ItemId::new("A"));
        merged.merge_leg(
            LegDomain::Wallet,
            &TransferReceipt {
                transaction_id: "t1".into(),
                amount: -10.0,
                ..Default::default()
            },
        );
        merged.merge_leg(
            LegDomain::Inventory,
            &TransferReceipt {
                inventory_id: "i1".into(),
                ..Default::default()
            },
        );
        assert_eq!(merged.transaction_id, "t1");
        assert_eq!(merged.inventory_id, "i1");
        assert_eq!(merged.amount, -10.0);
        assert_eq!(merged.item_id, ItemId::new("A"));
    }
}
