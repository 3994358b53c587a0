use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, ReservationId, UserId};
use domain::{Order, OrderStatus, Payment, PaymentState, PaymentStatus};
use inventory::InventoryItem;
use tokio::sync::RwLock;

use super::{IdempotencyStore, OrderRepository, PaymentRepository, ReservationStore};
use crate::error::{Result, SagaError};
use crate::reservations::{AttemptStatus, ReservationAttempt};

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    keys: HashMap<String, DateTime<Utc>>,
    attempts: HashMap<ReservationId, ReservationAttempt>,
}

/// In-memory implementation of every saga store.
///
/// Useful for testing and development. Not suitable for production as data
/// is lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    fail_order_inserts: Arc<AtomicBool>,
    fail_payment_settles: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent order inserts fail, simulating a database outage.
    pub fn set_fail_order_inserts(&self, fail: bool) {
        self.fail_order_inserts.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent payment settlements fail.
    pub fn set_fail_payment_settles(&self, fail: bool) {
        self.fail_payment_settles.store(fail, Ordering::SeqCst);
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        if self.fail_order_inserts.load(Ordering::SeqCst) {
            return Err(SagaError::CreateFailed("order storage unavailable".to_string()));
        }
        self.tables
            .write()
            .await
            .orders
            .insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(&id) {
            Some(order) if order.status == expected => {
                order.status = status;
                order.payment_status = payment_status;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .payments
            .values()
            .any(|p| p.provider_order_id == payment.provider_order_id)
        {
            return Err(SagaError::Validation(format!(
                "duplicate provider order id {}",
                payment.provider_order_id
            )));
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_by_provider_order_id(&self, provider_order_id: &str) -> Result<Option<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .values()
            .find(|p| p.provider_order_id == provider_order_id)
            .cloned())
    }

    async fn find_initiated_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.order_id == order_id && p.is_initiated())
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn complete(
        &self,
        id: PaymentId,
        state: PaymentState,
        provider_payment_id: Option<&str>,
    ) -> Result<bool> {
        if self.fail_payment_settles.load(Ordering::SeqCst) {
            return Err(SagaError::Dependency("payment storage unavailable".to_string()));
        }
        let mut tables = self.tables.write().await;
        match tables.payments.get_mut(&id) {
            Some(payment) if payment.is_initiated() => {
                payment.status = state;
                if let Some(provider_payment_id) = provider_payment_id {
                    payment.provider_payment_id = Some(provider_payment_id.to_string());
                }
                payment.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| SagaError::Validation(e.to_string()))?;
        let now = Utc::now();

        let mut tables = self.tables.write().await;
        tables.keys.retain(|_, expires_at| *expires_at > now);
        match tables.keys.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                tables.keys.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.tables.write().await.keys.remove(key);
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn create(&self, attempt: &ReservationAttempt) -> Result<()> {
        self.tables
            .write()
            .await
            .attempts
            .insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn find(&self, id: ReservationId) -> Result<Option<ReservationAttempt>> {
        Ok(self.tables.read().await.attempts.get(&id).cloned())
    }

    async fn record_reserved(&self, id: ReservationId, item: &InventoryItem) -> Result<()> {
        let mut tables = self.tables.write().await;
        let attempt = tables
            .attempts
            .get_mut(&id)
            .ok_or_else(|| SagaError::NotFound(format!("reservation {id}")))?;
        attempt.reserved.push(item.clone());
        attempt.updated_at = Utc::now();
        Ok(())
    }

    async fn transition(
        &self,
        id: ReservationId,
        from: AttemptStatus,
        to: AttemptStatus,
        order_id: Option<OrderId>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.attempts.get_mut(&id) {
            Some(attempt) if attempt.status == from => {
                attempt.status = to;
                if order_id.is_some() {
                    attempt.order_id = order_id;
                }
                attempt.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReservationAttempt>> {
        let tables = self.tables.read().await;
        let mut stale: Vec<ReservationAttempt> = tables
            .attempts
            .values()
            .filter(|a| a.status == AttemptStatus::Pending && a.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|a| a.created_at);
        stale.truncate(limit);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AddressId;
    use common::ProductId;
    use domain::OrderItem;

    fn order(user_id: UserId) -> Order {
        let item = OrderItem::new(
            ProductId::new("SKU-1"),
            "Widget",
            1,
            "10.00".parse().unwrap(),
        )
        .unwrap();
        Order::new(user_id, AddressId::new(), vec![item]).unwrap()
    }

    #[tokio::test]
    async fn status_update_is_conditional() {
        let store = InMemoryStore::new();
        let order = order(UserId::new());
        OrderRepository::insert(&store, &order).await.unwrap();

        assert!(
            store
                .update_status(
                    order.id,
                    OrderStatus::Pending,
                    OrderStatus::Confirmed,
                    PaymentStatus::Paid
                )
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_status(
                    order.id,
                    OrderStatus::Pending,
                    OrderStatus::Failed,
                    PaymentStatus::Failed
                )
                .await
                .unwrap()
        );

        let stored = OrderRepository::get(&store, order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn list_is_scoped_and_newest_first() {
        let store = InMemoryStore::new();
        let user = UserId::new();

        let mut older = order(user);
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = order(user);
        OrderRepository::insert(&store, &older).await.unwrap();
        OrderRepository::insert(&store, &newer).await.unwrap();
        OrderRepository::insert(&store, &order(UserId::new()))
            .await
            .unwrap();

        let orders = store.list_for_user(user).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, newer.id);
        assert_eq!(orders[1].id, older.id);
    }

    #[tokio::test]
    async fn payment_completes_once() {
        let store = InMemoryStore::new();
        let payment = Payment::initiated(
            OrderId::new(),
            "razorpay",
            "order_1",
            "10.00".parse().unwrap(),
            "INR",
        );
        PaymentRepository::insert(&store, &payment).await.unwrap();

        assert!(
            store
                .complete(payment.id, PaymentState::Successful, Some("pay_1"))
                .await
                .unwrap()
        );
        assert!(
            !store
                .complete(payment.id, PaymentState::Failed, Some("pay_1"))
                .await
                .unwrap()
        );

        let stored = store
            .find_by_provider_order_id("order_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PaymentState::Successful);
        assert_eq!(stored.provider_payment_id.as_deref(), Some("pay_1"));
        assert!(
            store
                .find_initiated_for_order(payment.order_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn claims_expire_and_can_be_released() {
        let store = InMemoryStore::new();

        assert!(store.try_claim("k", Duration::from_secs(60)).await.unwrap());
        assert!(!store.try_claim("k", Duration::from_secs(60)).await.unwrap());

        store.release("k").await.unwrap();
        assert!(store.try_claim("k", Duration::from_secs(60)).await.unwrap());

        assert!(store.try_claim("short", Duration::ZERO).await.unwrap());
        assert!(store.try_claim("short", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_claims_are_pruned() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            let key = format!("notification-sent:order:{i}");
            assert!(store.try_claim(&key, Duration::ZERO).await.unwrap());
        }
        assert!(store.try_claim("live", Duration::from_secs(60)).await.unwrap());

        let keys = store.tables.read().await.keys.clone();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("live"));
    }

    #[tokio::test]
    async fn reserved_items_accumulate() {
        let store = InMemoryStore::new();
        let attempt = ReservationAttempt::new(UserId::new());
        store.create(&attempt).await.unwrap();

        store
            .record_reserved(attempt.id, &InventoryItem::new("SKU-1", 2))
            .await
            .unwrap();
        store
            .record_reserved(attempt.id, &InventoryItem::new("SKU-2", 1))
            .await
            .unwrap();

        let stored = store.find(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.reserved.len(), 2);
        assert_eq!(stored.reserved[1].product_id, ProductId::new("SKU-2"));
    }
}
