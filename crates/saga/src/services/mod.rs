//! Collaborators of the saga coordinator: catalog lookup, command
//! publishing, compensation and receipt correlation.

pub mod catalog;
pub mod compensation;
pub mod correlator;
pub mod publisher;
pub mod simulated;

pub use catalog::{CatalogItem, CatalogItems, CatalogLookup, HttpCatalogClient, InMemoryCatalog};
pub use compensation::CompensationExecutor;
pub use correlator::{LogResponseCorrelator, ResponseCorrelator};
pub use publisher::{CommandPublisher, LogCommandPublisher};
pub use simulated::SimulatedDownstream;
