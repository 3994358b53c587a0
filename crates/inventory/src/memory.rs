use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{ProductId, RequestId};
use tokio::sync::Mutex;

use crate::{
    InventoryError, Result,
    ledger::{
        DeductStatus, InventoryItem, InventoryLedger, InventoryRecord, ItemResult, ReleaseStatus,
        ReserveStatus, record_outcome, validate_items,
    },
};

/// In-memory ledger for tests and single-process deployments.
///
/// One mutex guards the whole table so each check-and-update is atomic.
#[derive(Clone, Default)]
pub struct InMemoryInventoryLedger {
    records: Arc<Mutex<HashMap<ProductId, InventoryRecord>>>,
}

impl InMemoryInventoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger seeded with `(product, stock)` pairs.
    pub fn with_stock<I, P>(stock: I) -> Self
    where
        I: IntoIterator<Item = (P, u32)>,
        P: Into<ProductId>,
    {
        let records = stock
            .into_iter()
            .map(|(p, qty)| {
                let id = p.into();
                (id.clone(), InventoryRecord::new(id, qty))
            })
            .collect();
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn reserve(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<ReserveStatus>>> {
        validate_items(items)?;

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let status = {
                let mut records = self.records.lock().await;
                match records.get_mut(&item.product_id) {
                    Some(record) => match record.reserved_quantity.checked_add(item.quantity) {
                        Some(total) if total <= record.stock_quantity => {
                            record.reserved_quantity = total;
                            record.updated_at = Utc::now();
                            ReserveStatus::Reserved
                        }
                        _ => ReserveStatus::InsufficientStock,
                    },
                    None => ReserveStatus::InsufficientStock,
                }
            };
            record_outcome("reserve", status.as_str());
            results.push(ItemResult::new(item.product_id.clone(), status));
        }
        Ok(results)
    }

    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn release(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<ReleaseStatus>>> {
        validate_items(items)?;

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let status = {
                let mut records = self.records.lock().await;
                match records.get_mut(&item.product_id) {
                    Some(record) => {
                        record.reserved_quantity =
                            record.reserved_quantity.saturating_sub(item.quantity);
                        record.updated_at = Utc::now();
                        ReleaseStatus::Released
                    }
                    None => ReleaseStatus::NotFound,
                }
            };
            record_outcome("release", status.as_str());
            results.push(ItemResult::new(item.product_id.clone(), status));
        }
        Ok(results)
    }

    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn deduct(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<DeductStatus>>> {
        validate_items(items)?;

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let status = {
                let mut records = self.records.lock().await;
                match records.get_mut(&item.product_id) {
                    Some(record) if record.reserved_quantity >= item.quantity => {
                        record.stock_quantity -= item.quantity;
                        record.reserved_quantity -= item.quantity;
                        record.updated_at = Utc::now();
                        DeductStatus::Deducted
                    }
                    Some(_) => DeductStatus::InsufficientReservation,
                    None => DeductStatus::NotFound,
                }
            };
            record_outcome("deduct", status.as_str());
            results.push(ItemResult::new(item.product_id.clone(), status));
        }
        Ok(results)
    }

    async fn get(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        Ok(self.records.lock().await.get(product_id).cloned())
    }

    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<InventoryRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(product_id.clone())
            .or_insert_with(|| InventoryRecord::new(product_id.clone(), 0));

        if stock < record.reserved_quantity {
            return Err(InventoryError::StockBelowReserved {
                product_id: product_id.to_string(),
                stock,
                reserved: record.reserved_quantity,
            });
        }

        record.stock_quantity = stock;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}
