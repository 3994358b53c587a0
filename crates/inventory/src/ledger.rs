use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ProductId, RequestId};
use serde::{Deserialize, Serialize};

use crate::{InventoryError, Result};

/// A product and a quantity to reserve, release or deduct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl InventoryItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Per-item outcome of a reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReserveStatus {
    Reserved,
    /// Not enough unreserved stock, or the product is unknown.
    InsufficientStock,
}

/// Per-item outcome of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    Released,
    NotFound,
}

/// Per-item outcome of a deduct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeductStatus {
    Deducted,
    InsufficientReservation,
    NotFound,
}

impl ReserveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReserveStatus::Reserved => "RESERVED",
            ReserveStatus::InsufficientStock => "INSUFFICIENT_STOCK",
        }
    }
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Released => "RELEASED",
            ReleaseStatus::NotFound => "NOT_FOUND",
        }
    }
}

impl DeductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeductStatus::Deducted => "DEDUCTED",
            DeductStatus::InsufficientReservation => "INSUFFICIENT_RESERVATION",
            DeductStatus::NotFound => "NOT_FOUND",
        }
    }
}

/// Outcome for one item of a list operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult<S> {
    pub product_id: ProductId,
    pub status: S,
}

impl<S> ItemResult<S> {
    pub fn new(product_id: ProductId, status: S) -> Self {
        Self { product_id, status }
    }
}

/// Stock position of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub stock_quantity: u32,
    pub reserved_quantity: u32,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn new(product_id: ProductId, stock_quantity: u32) -> Self {
        Self {
            product_id,
            stock_quantity,
            reserved_quantity: 0,
            updated_at: Utc::now(),
        }
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> u32 {
        self.stock_quantity.saturating_sub(self.reserved_quantity)
    }
}

/// The stock ledger shared by every service in the saga.
///
/// Each item is applied with one atomic check-and-update. A list is not a
/// transaction: earlier items stay applied when a later one fails. There is
/// no idempotency bookkeeping here, so callers must not blindly retry.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Reserves each item if `reserved + quantity <= stock`.
    async fn reserve(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<ReserveStatus>>>;

    /// Returns reserved units to the available pool, never going below zero.
    async fn release(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<ReleaseStatus>>>;

    /// Converts a reservation into a sale, reducing stock and reservation.
    async fn deduct(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<DeductStatus>>>;

    /// Reads one product's stock position.
    async fn get(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>>;

    /// Creates or restocks a product. Fails if `stock` is below the
    /// quantity already reserved.
    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<InventoryRecord>;
}

/// Rejects empty lists and zero quantities.
pub fn validate_items(items: &[InventoryItem]) -> Result<()> {
    if items.is_empty() {
        return Err(InventoryError::Validation(
            "at least one item is required".to_string(),
        ));
    }
    for item in items {
        if item.quantity == 0 {
            return Err(InventoryError::Validation(format!(
                "quantity for {} must be at least 1",
                item.product_id
            )));
        }
        if item.quantity > i32::MAX as u32 {
            return Err(InventoryError::Validation(format!(
                "quantity for {} is too large",
                item.product_id
            )));
        }
    }
    Ok(())
}

pub(crate) fn record_outcome(operation: &'static str, status: &'static str) {
    metrics::counter!(
        "inventory_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}
