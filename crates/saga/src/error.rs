//! Saga error types.

use common::ProductId;
use domain::DomainError;
use event_log::EventLogError;
use inventory::InventoryError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Products are unknown or inactive in the catalog.
    #[error("Invalid products: {}", join(.0))]
    InvalidProducts(Vec<ProductId>),

    /// Stock could not be reserved for a product.
    #[error("Insufficient stock for: {}", join(.0))]
    InsufficientStock(Vec<ProductId>),

    /// The resource does not exist or is not visible to the caller.
    #[error("{0} not found")]
    NotFound(String),

    /// The order has already been paid for.
    #[error("Order is already paid")]
    AlreadyPaid,

    /// The order is not in a state that allows the operation.
    #[error("Invalid order state: {0}")]
    InvalidState(String),

    /// A downstream service failed or timed out.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// The order could not be persisted after stock was reserved.
    #[error("Order creation failed: {0}")]
    CreateFailed(String),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Event log error.
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// Inventory ledger error.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join(ids: &[ProductId]) -> String {
    ids.iter()
        .map(ProductId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
