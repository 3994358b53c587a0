use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, OrderId, PaymentId, ProductId, ReservationId, UserId};
use domain::{Money, Order, OrderItem, OrderStatus, Payment, PaymentState, PaymentStatus};
use inventory::InventoryItem;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{IdempotencyStore, OrderRepository, PaymentRepository, ReservationStore};
use crate::error::Result;
use crate::reservations::{AttemptStatus, ReservationAttempt};

/// PostgreSQL implementation of every saga store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
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

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            address_id: AddressId::from_uuid(row.try_get("address_id")?),
            status: row.try_get::<String, _>("status")?.parse()?,
            payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
            total_amount: Money::new(row.try_get::<Decimal, _>("total_amount")?),
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        let item = OrderItem::new(
            ProductId::new(row.try_get::<String, _>("product_id")?),
            row.try_get::<String, _>("product_name")?,
            row.try_get::<i32, _>("quantity")? as u32,
            Money::new(row.try_get::<Decimal, _>("unit_price")?),
        )?;
        Ok(item)
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            provider: row.try_get("provider")?,
            provider_order_id: row.try_get("provider_order_id")?,
            provider_payment_id: row.try_get("provider_payment_id")?,
            amount: Money::new(row.try_get::<Decimal, _>("amount")?),
            currency: row.try_get("currency")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_attempt(row: &PgRow) -> Result<ReservationAttempt> {
        let reserved: Json<Vec<InventoryItem>> = row.try_get("reserved")?;
        let order_id: Option<Uuid> = row.try_get("order_id")?;
        Ok(ReservationAttempt {
            id: ReservationId::from_uuid(row.try_get("id")?),
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            status: row.try_get::<String, _>("status")?.parse()?,
            reserved: reserved.0,
            order_id: order_id.map(OrderId::from_uuid),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn items_for(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity, unit_price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items
                .entry(order_id)
                .or_default()
                .push(Self::row_to_item(row)?);
        }
        Ok(items)
    }
}

const ORDER_COLUMNS: &str =
    "id, user_id, address_id, status, payment_status, total_amount, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, order_id, provider, provider_order_id, provider_payment_id, \
     amount, currency, status, created_at, updated_at";

#[async_trait]
impl OrderRepository for PostgresStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders
                (id, user_id, address_id, status, payment_status, total_amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.address_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.total_amount.amount())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (order_id, position, product_id, product_name, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(item.product_id.as_str())
            .bind(&item.product_name)
            .bind(item.quantity as i32)
            .bind(item.unit_price.amount())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut items = self.items_for(&[id.as_uuid()]).await?;
        let items = items.remove(&id.as_uuid()).unwrap_or_default();
        Self::row_to_order(&row, items).map(Some)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<std::result::Result<Vec<Uuid>, sqlx::Error>>()?;
        let mut items = self.items_for(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }

    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, payment_status = $4, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(status.as_str())
        .bind(payment_status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl PaymentRepository for PostgresStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, order_id, provider, provider_order_id, provider_payment_id,
                 amount, currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(&payment.provider)
        .bind(&payment.provider_order_id)
        .bind(payment.provider_payment_id.as_deref())
        .bind(payment.amount.amount())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_provider_order_id(&self, provider_order_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_order_id = $1"
        ))
        .bind(provider_order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn find_initiated_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE order_id = $1 AND status = 'initiated' \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn complete(
        &self,
        id: PaymentId,
        state: PaymentState,
        provider_payment_id: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2,
                provider_payment_id = COALESCE($3, provider_payment_id),
                updated_at = now()
            WHERE id = $1 AND status = 'initiated'
            "#,
        )
        .bind(id.as_uuid())
        .bind(state.as_str())
        .bind(provider_payment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        // An expired claim is taken over in place; a live one leaves the
        // row untouched and returns nothing.
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO idempotency_keys (key, expires_at)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
                SET expires_at = EXCLUDED.expires_at, created_at = now()
                WHERE idempotency_keys.expires_at <= now()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn create(&self, attempt: &ReservationAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservation_attempts
                (id, user_id, status, reserved, order_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(attempt.id.as_uuid())
        .bind(attempt.user_id.as_uuid())
        .bind(attempt.status.as_str())
        .bind(Json(&attempt.reserved))
        .bind(attempt.order_id.map(|id| id.as_uuid()))
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: ReservationId) -> Result<Option<ReservationAttempt>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, reserved, order_id, created_at, updated_at
            FROM reservation_attempts WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_attempt).transpose()
    }

    async fn record_reserved(&self, id: ReservationId, item: &InventoryItem) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE reservation_attempts
            SET reserved = reserved || $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(Json([item]))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        id: ReservationId,
        from: AttemptStatus,
        to: AttemptStatus,
        order_id: Option<OrderId>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservation_attempts
            SET status = $3, order_id = COALESCE($4, order_id), updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(order_id.map(|id| id.as_uuid()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReservationAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, reserved, order_id, created_at, updated_at
            FROM reservation_attempts
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_attempt).collect()
    }
}
