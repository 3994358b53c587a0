//! Domain error types.

use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised while building or mutating domain records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// An order must contain at least one item.
    #[error("Order has no items")]
    NoItems,

    /// Quantities start at one.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// A monetary amount could not be parsed or is out of range.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The requested status change is not allowed.
    #[error("Invalid state transition: cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A status string was not recognised.
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// An event entry is missing a required field.
    #[error("Missing event field: {0}")]
    MissingField(&'static str),

    /// An event entry carries a field that could not be decoded.
    #[error("Invalid event field {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    /// The `type` field names no known event.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
