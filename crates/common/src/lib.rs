//! Identifier types shared by every crate in the payment workspace.

pub mod types;

pub use types::{ItemId, PlayerId};
