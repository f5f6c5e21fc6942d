//! Topic names and operation keys shared with the wallet and inventory
//! services.

/// Wallet commands.
pub const PLAYER_TOPIC: &str = "player";

/// Inventory commands.
pub const INVENTORY_TOPIC: &str = "inventory";

/// Receipts from both services.
pub const PAYMENT_TOPIC: &str = "payment";

/// Consumer name under which response offsets are stored.
pub const PAYMENT_CONSUMER: &str = "payment";

pub const KEY_BUY: &str = "buy";
pub const KEY_SELL: &str = "sell";

/// Reverses a wallet transaction.
pub const KEY_ROLLBACK_TRANSACTION: &str = "rtransaction";

/// Removes an item that a buy added.
pub const KEY_ROLLBACK_REMOVE: &str = "rremove";

/// Re-adds an item that a sell removed.
pub const KEY_ROLLBACK_ADD: &str = "radd";
