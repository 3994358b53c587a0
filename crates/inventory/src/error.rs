use thiserror::Error;

/// Errors that can occur when interacting with the inventory ledger.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The request itself is malformed (empty list, zero quantity).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stock cannot be set below what is already reserved.
    #[error("Stock {stock} for {product_id} is below reserved quantity {reserved}")]
    StockBelowReserved {
        product_id: String,
        stock: u32,
        reserved: u32,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The remote ledger could not be reached or timed out.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A service token could not be minted.
    #[error("Token error: {0}")]
    Token(#[from] common::TokenError),

    /// The remote ledger answered with an error.
    #[error("Remote ledger returned {status}: {message}")]
    Remote { status: u16, message: String },
}

impl InventoryError {
    /// Returns true for failures of the transport rather than the ledger.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            InventoryError::Transport(_) | InventoryError::Remote { .. }
        )
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
