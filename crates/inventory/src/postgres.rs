use async_trait::async_trait;
use common::{ProductId, RequestId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    InventoryError, Result,
    ledger::{
        DeductStatus, InventoryItem, InventoryLedger, InventoryRecord, ItemResult, ReleaseStatus,
        ReserveStatus, record_outcome, validate_items,
    },
};

/// PostgreSQL-backed inventory ledger.
///
/// Each item is one conditional `UPDATE … RETURNING`, so the row lock taken
/// by Postgres makes the check and the increment a single atomic step.
#[derive(Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
}

impl PostgresInventoryLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<InventoryRecord> {
        Ok(InventoryRecord {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            stock_quantity: row.try_get::<i32, _>("stock_quantity")? as u32,
            reserved_quantity: row.try_get::<i32, _>("reserved_quantity")? as u32,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn reserve(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<ReserveStatus>>> {
        validate_items(items)?;

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let updated: Option<String> = sqlx::query_scalar(
                r#"
                UPDATE inventory
                SET reserved_quantity = reserved_quantity + $2, updated_at = now()
                WHERE product_id = $1 AND reserved_quantity + $2 <= stock_quantity
                RETURNING product_id
                "#,
            )
            .bind(item.product_id.as_str())
            .bind(item.quantity as i32)
            .fetch_optional(&self.pool)
            .await?;

            let status = match updated {
                Some(_) => ReserveStatus::Reserved,
                None => ReserveStatus::InsufficientStock,
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
            let updated: Option<String> = sqlx::query_scalar(
                r#"
                UPDATE inventory
                SET reserved_quantity = GREATEST(reserved_quantity - $2, 0), updated_at = now()
                WHERE product_id = $1
                RETURNING product_id
                "#,
            )
            .bind(item.product_id.as_str())
            .bind(item.quantity as i32)
            .fetch_optional(&self.pool)
            .await?;

            let status = match updated {
                Some(_) => ReleaseStatus::Released,
                None => ReleaseStatus::NotFound,
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
            let updated: Option<String> = sqlx::query_scalar(
                r#"
                UPDATE inventory
                SET stock_quantity = stock_quantity - $2,
                    reserved_quantity = reserved_quantity - $2,
                    updated_at = now()
                WHERE product_id = $1 AND reserved_quantity >= $2
                RETURNING product_id
                "#,
            )
            .bind(item.product_id.as_str())
            .bind(item.quantity as i32)
            .fetch_optional(&self.pool)
            .await?;

            let status = match updated {
                Some(_) => DeductStatus::Deducted,
                None => {
                    let exists: bool = sqlx::query_scalar(
                        "SELECT EXISTS(SELECT 1 FROM inventory WHERE product_id = $1)",
                    )
                    .bind(item.product_id.as_str())
                    .fetch_one(&self.pool)
                    .await?;
                    if exists {
                        DeductStatus::InsufficientReservation
                    } else {
                        DeductStatus::NotFound
                    }
                }
            };
            record_outcome("deduct", status.as_str());
            results.push(ItemResult::new(item.product_id.clone(), status));
        }
        Ok(results)
    }

    async fn get(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, stock_quantity, reserved_quantity, updated_at
            FROM inventory WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<InventoryRecord> {
        if stock > i32::MAX as u32 {
            return Err(InventoryError::Validation(format!(
                "stock for {product_id} is too large"
            )));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO inventory (product_id, stock_quantity, reserved_quantity)
            VALUES ($1, $2, 0)
            ON CONFLICT (product_id) DO UPDATE
                SET stock_quantity = EXCLUDED.stock_quantity, updated_at = now()
                WHERE inventory.reserved_quantity <= EXCLUDED.stock_quantity
            RETURNING product_id, stock_quantity, reserved_quantity, updated_at
            "#,
        )
        .bind(product_id.as_str())
        .bind(stock as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_record(row),
            None => {
                let reserved = self
                    .get(product_id)
                    .await?
                    .map(|r| r.reserved_quantity)
                    .unwrap_or_default();
                Err(InventoryError::StockBelowReserved {
                    product_id: product_id.to_string(),
                    stock,
                    reserved,
                })
            }
        }
    }
}
