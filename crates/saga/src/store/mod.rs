//! Persistence for orders, payments, idempotency keys and reservation
//! attempts.
//!
//! Every state change that races with another writer is conditional and
//! reports whether it applied, so callers never overwrite a newer state.

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, ReservationId, UserId};
use domain::{Order, OrderStatus, Payment, PaymentState, PaymentStatus};
use inventory::InventoryItem;

use crate::error::Result;
use crate::reservations::{AttemptStatus, ReservationAttempt};

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Storage for orders and their items.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists a new order with its items.
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Returns a user's orders, newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Moves the order to `status` only if it is currently `expected`.
    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<bool>;
}

/// Storage for provider payments.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<()>;

    async fn find_by_provider_order_id(&self, provider_order_id: &str) -> Result<Option<Payment>>;

    /// Returns the newest still-initiated payment for an order.
    async fn find_initiated_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Settles an initiated payment. Returns false if it was already settled.
    async fn complete(
        &self,
        id: PaymentId,
        state: PaymentState,
        provider_payment_id: Option<&str>,
    ) -> Result<bool>;
}

/// Create-if-absent keys with an expiry.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claims `key` for `ttl`. Returns false if a live claim already exists.
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Drops a claim so the work can be retried.
    async fn release(&self, key: &str) -> Result<()>;
}

/// Durable record of the items reserved by each `create_order` call.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn create(&self, attempt: &ReservationAttempt) -> Result<()>;

    async fn find(&self, id: ReservationId) -> Result<Option<ReservationAttempt>>;

    /// Appends an item that was successfully reserved.
    async fn record_reserved(&self, id: ReservationId, item: &InventoryItem) -> Result<()>;

    /// Moves the attempt from `from` to `to`, optionally linking the order.
    /// Returns false if the attempt was not in `from`.
    async fn transition(
        &self,
        id: ReservationId,
        from: AttemptStatus,
        to: AttemptStatus,
        order_id: Option<OrderId>,
    ) -> Result<bool>;

    /// Pending attempts created before `older_than`, oldest first.
    async fn stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReservationAttempt>>;
}
