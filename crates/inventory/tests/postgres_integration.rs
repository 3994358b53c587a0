//! PostgreSQL integration tests for the inventory ledger
//!
//! Run with:
//!
//! ```bash
//! cargo test -p inventory --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{ProductId, RequestId};
use inventory::{
    DeductStatus, InventoryError, InventoryItem, InventoryLedger, PostgresInventoryLedger,
    ReleaseStatus, ReserveStatus,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
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
            PostgresInventoryLedger::new(temp_pool.clone())
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

async fn get_test_ledger() -> PostgresInventoryLedger {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE inventory")
        .execute(&pool)
        .await
        .unwrap();

    PostgresInventoryLedger::new(pool)
}

fn rid() -> RequestId {
    RequestId::generate()
}

#[tokio::test]
#[serial]
async fn reserve_release_deduct_cycle() {
    let ledger = get_test_ledger().await;
    let sku = ProductId::new("SKU-1");
    ledger.set_stock(&sku, 10).await.unwrap();

    let reserved = ledger
        .reserve(&[InventoryItem::new("SKU-1", 4)], &rid())
        .await
        .unwrap();
    assert_eq!(reserved[0].status, ReserveStatus::Reserved);

    let released = ledger
        .release(&[InventoryItem::new("SKU-1", 1)], &rid())
        .await
        .unwrap();
    assert_eq!(released[0].status, ReleaseStatus::Released);

    let deducted = ledger
        .deduct(&[InventoryItem::new("SKU-1", 3)], &rid())
        .await
        .unwrap();
    assert_eq!(deducted[0].status, DeductStatus::Deducted);

    let record = ledger.get(&sku).await.unwrap().unwrap();
    assert_eq!(record.stock_quantity, 7);
    assert_eq!(record.reserved_quantity, 0);
}

#[tokio::test]
#[serial]
async fn reserve_rejects_oversell_and_unknown_products() {
    let ledger = get_test_ledger().await;
    ledger.set_stock(&ProductId::new("SKU-1"), 2).await.unwrap();

    let results = ledger
        .reserve(
            &[InventoryItem::new("SKU-1", 3), InventoryItem::new("GHOST", 1)],
            &rid(),
        )
        .await
        .unwrap();
    assert_eq!(results[0].status, ReserveStatus::InsufficientStock);
    assert_eq!(results[1].status, ReserveStatus::InsufficientStock);

    let record = ledger.get(&ProductId::new("SKU-1")).await.unwrap().unwrap();
    assert_eq!(record.reserved_quantity, 0);
}

#[tokio::test]
#[serial]
async fn release_clamps_and_deduct_reports_missing() {
    let ledger = get_test_ledger().await;
    ledger.set_stock(&ProductId::new("SKU-1"), 5).await.unwrap();
    ledger
        .reserve(&[InventoryItem::new("SKU-1", 1)], &rid())
        .await
        .unwrap();

    ledger
        .release(&[InventoryItem::new("SKU-1", 9)], &rid())
        .await
        .unwrap();
    let record = ledger.get(&ProductId::new("SKU-1")).await.unwrap().unwrap();
    assert_eq!(record.reserved_quantity, 0);

    let results = ledger
        .deduct(
            &[InventoryItem::new("SKU-1", 1), InventoryItem::new("GHOST", 1)],
            &rid(),
        )
        .await
        .unwrap();
    assert_eq!(results[0].status, DeductStatus::InsufficientReservation);
    assert_eq!(results[1].status, DeductStatus::NotFound);
}

#[tokio::test]
#[serial]
async fn set_stock_refuses_to_drop_below_reserved() {
    let ledger = get_test_ledger().await;
    let sku = ProductId::new("SKU-1");
    ledger.set_stock(&sku, 5).await.unwrap();
    ledger
        .reserve(&[InventoryItem::new("SKU-1", 4)], &rid())
        .await
        .unwrap();

    let result = ledger.set_stock(&sku, 3).await;
    assert!(matches!(
        result,
        Err(InventoryError::StockBelowReserved { reserved: 4, .. })
    ));

    let record = ledger.set_stock(&sku, 8).await.unwrap();
    assert_eq!(record.stock_quantity, 8);
    assert_eq!(record.available(), 4);
}

#[tokio::test]
#[serial]
async fn concurrent_reservations_never_oversell() {
    let ledger = get_test_ledger().await;
    ledger.set_stock(&ProductId::new("SKU-1"), 5).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .reserve(&[InventoryItem::new("SKU-1", 1)], &RequestId::generate())
                .await
                .unwrap()
        }));
    }

    let mut reserved = 0;
    for handle in handles {
        if handle.await.unwrap()[0].status == ReserveStatus::Reserved {
            reserved += 1;
        }
    }
    assert_eq!(reserved, 5);

    let record = ledger.get(&ProductId::new("SKU-1")).await.unwrap().unwrap();
    assert_eq!(record.reserved_quantity, 5);
}
