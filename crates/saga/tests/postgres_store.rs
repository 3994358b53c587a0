//! PostgreSQL integration tests for the saga stores.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_store -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{AddressId, OrderId, ProductId, UserId};
use domain::{Order, OrderItem, OrderStatus, Payment, PaymentState, PaymentStatus};
use inventory::InventoryItem;
use saga::{
    AttemptStatus, IdempotencyStore, OrderRepository, PaymentRepository, PostgresStore,
    ReservationAttempt, ReservationStore,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE payments, order_items, orders, idempotency_keys, reservation_attempts",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

fn order(user_id: UserId) -> Order {
    let items = vec![
        OrderItem::new(
            ProductId::new("SKU-1"),
            "Widget",
            2,
            "100.00".parse().unwrap(),
        )
        .unwrap(),
        OrderItem::new(ProductId::new("SKU-2"), "Gadget", 1, "0.99".parse().unwrap()).unwrap(),
    ];
    Order::new(user_id, AddressId::new(), items).unwrap()
}

#[tokio::test]
#[serial]
async fn order_round_trips_with_items() {
    let store = get_test_store().await;
    let order = order(UserId::new());

    OrderRepository::insert(&store, &order).await.unwrap();
    let loaded = store.get(order.id).await.unwrap().unwrap();

    assert_eq!(loaded.id, order.id);
    assert_eq!(loaded.total_amount.to_string(), "200.99");
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.items[0].product_id, ProductId::new("SKU-1"));
    assert_eq!(loaded.items[1].line_total.to_string(), "0.99");
    assert_eq!(loaded.status, OrderStatus::Pending);

    assert!(store.get(OrderId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn list_is_scoped_and_newest_first() {
    let store = get_test_store().await;
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
    assert_eq!(orders[1].items.len(), 2);
}

#[tokio::test]
#[serial]
async fn status_update_is_conditional() {
    let store = get_test_store().await;
    let order = order(UserId::new());
    OrderRepository::insert(&store, &order).await.unwrap();

    assert!(
        store
            .update_status(
                order.id,
                OrderStatus::Pending,
                OrderStatus::Failed,
                PaymentStatus::Failed
            )
            .await
            .unwrap()
    );
    assert!(
        !store
            .update_status(
                order.id,
                OrderStatus::Pending,
                OrderStatus::Confirmed,
                PaymentStatus::Paid
            )
            .await
            .unwrap()
    );

    let loaded = store.get(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Failed);
    assert_eq!(loaded.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
#[serial]
async fn payment_settles_once() {
    let store = get_test_store().await;
    let order = order(UserId::new());
    OrderRepository::insert(&store, &order).await.unwrap();

    let payment = Payment::initiated(
        order.id,
        "razorpay",
        "order_abc",
        order.total_amount,
        "INR",
    );
    PaymentRepository::insert(&store, &payment).await.unwrap();

    let initiated = store
        .find_initiated_for_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(initiated.id, payment.id);

    assert!(
        store
            .complete(payment.id, PaymentState::Successful, Some("pay_1"))
            .await
            .unwrap()
    );
    assert!(
        !store
            .complete(payment.id, PaymentState::Failed, Some("pay_2"))
            .await
            .unwrap()
    );

    let loaded = store
        .find_by_provider_order_id("order_abc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.status, PaymentState::Successful);
    assert_eq!(loaded.provider_payment_id.as_deref(), Some("pay_1"));
    assert_eq!(loaded.amount, order.total_amount);
    assert!(
        store
            .find_initiated_for_order(order.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn idempotency_claims() {
    let store = get_test_store().await;
    let ttl = Duration::from_secs(60);

    assert!(store.try_claim("payment:webhook:pay_1", ttl).await.unwrap());
    assert!(!store.try_claim("payment:webhook:pay_1", ttl).await.unwrap());

    store.release("payment:webhook:pay_1").await.unwrap();
    assert!(store.try_claim("payment:webhook:pay_1", ttl).await.unwrap());

    assert!(store.try_claim("expired", Duration::ZERO).await.unwrap());
    assert!(store.try_claim("expired", ttl).await.unwrap());
}

#[tokio::test]
#[serial]
async fn concurrent_claims_have_one_winner() {
    let store = get_test_store().await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .try_claim("payment:webhook:pay_race", Duration::from_secs(60))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[serial]
async fn reservation_attempt_lifecycle() {
    let store = get_test_store().await;

    let mut stale = ReservationAttempt::new(UserId::new());
    stale.created_at = Utc::now() - chrono::Duration::minutes(30);
    store.create(&stale).await.unwrap();
    store
        .record_reserved(stale.id, &InventoryItem::new("SKU-1", 2))
        .await
        .unwrap();
    store
        .record_reserved(stale.id, &InventoryItem::new("SKU-2", 1))
        .await
        .unwrap();

    let fresh = ReservationAttempt::new(UserId::new());
    store.create(&fresh).await.unwrap();

    let found = store
        .stale(Utc::now() - chrono::Duration::minutes(15), 10)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, stale.id);
    assert_eq!(
        found[0].reserved,
        vec![InventoryItem::new("SKU-1", 2), InventoryItem::new("SKU-2", 1)]
    );

    let order_id = OrderId::new();
    assert!(
        store
            .transition(
                stale.id,
                AttemptStatus::Pending,
                AttemptStatus::Completed,
                Some(order_id)
            )
            .await
            .unwrap()
    );
    assert!(
        !store
            .transition(
                stale.id,
                AttemptStatus::Pending,
                AttemptStatus::Reconciled,
                None
            )
            .await
            .unwrap()
    );

    let loaded = store.find(stale.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, AttemptStatus::Completed);
    assert_eq!(loaded.order_id, Some(order_id));
}
