//! Shared domain model and workflow rules for the EV distribution platform
//!
//! This crate holds every rule of the distribution and fulfillment workflow
//! as pure code shared by the backend and the dashboard (via WASM): status
//! machines, the stock book, the allocation engine and payment reconciliation.

pub mod allocation;
pub mod error;
pub mod ledger;
pub mod models;
pub mod types;
pub mod validation;

pub use error::*;
pub use models::*;
pub use types::*;
pub use validation::*;
