//! Inventory ledger.
//!
//! Tracks stock and reserved quantities per product. Every per-item
//! operation is a single atomic check-and-update, so concurrent reservations
//! can never oversell. Lists are processed item by item and are not
//! transactional as a whole; callers compensate.

pub mod client;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;

pub use client::HttpInventoryClient;
pub use error::{InventoryError, Result};
pub use ledger::{
    DeductStatus, InventoryItem, InventoryLedger, InventoryRecord, ItemResult, ReleaseStatus,
    ReserveStatus,
};
pub use memory::InMemoryInventoryLedger;
pub use postgres::PostgresInventoryLedger;
