//! Saga orchestration for buying and selling virtual items.
//!
//! A purchase saga prices the requested items against the catalog, then
//! drives wallet and inventory legs through a durable message log:
//!
//! 1. Buy: debit the wallet for every item, then add every item to the inventory
//! 2. Sell: remove every item from the inventory, then credit the wallet
//!
//! Each leg's command is tagged, and the matching receipt is picked up
//! from the response partition. If any leg fails, every leg that was
//! applied is compensated in reverse order.

pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod instance;
pub mod model;
pub mod services;
pub mod state;
pub mod tag;
pub mod topics;

pub use command::{Command, RollbackRequest};
pub use config::SagaConfig;
pub use coordinator::{CancelSignal, SagaCoordinator, SagaReport, never_cancelled};
pub use error::{Reversal, SagaError, UnreversedLeg};
pub use events::SagaEvent;
pub use instance::{LegRecord, LegStatus, SagaInstance};
pub use model::{LegDomain, LineItem, Operation, PurchaseRequest, TransferReceipt};
pub use services::{
    CatalogItem, CatalogItems, CatalogLookup, CommandPublisher, CompensationExecutor,
    HttpCatalogClient, InMemoryCatalog, LogCommandPublisher, LogResponseCorrelator,
    ResponseCorrelator, SimulatedDownstream,
};
pub use state::SagaState;
pub use tag::{CorrelationTag, TagGenerator};
