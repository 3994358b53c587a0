//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-log --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use event_log::{EntryId, EventLog, EventLogError, Fields, PostgresEventLog, ReadOptions, Topic};
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

/// Global shared container
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
            PostgresEventLog::new(temp_pool.clone())
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

/// Get a fresh log with its own pool and cleared tables
async fn get_test_log() -> PostgresEventLog {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE event_log, event_log_topics, event_log_groups, event_log_pending")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventLog::new(pool)
}

fn fields(kind: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("type".to_string(), kind.to_string());
    fields.insert("orderId".to_string(), "6f1c1a52-3b1e-4bd4-9d0b-3f6f8a0c2b11".to_string());
    fields
}

fn immediate() -> ReadOptions {
    ReadOptions::new()
        .block(Duration::ZERO)
        .min_idle(Duration::from_secs(60))
}

#[tokio::test]
#[serial]
async fn append_and_range() {
    let log = get_test_log().await;

    let first = log.append(Topic::Order, fields("ORDER_CREATED")).await.unwrap();
    let second = log
        .append(Topic::Order, fields("ORDER_CREATED"))
        .await
        .unwrap();
    let payment = log
        .append(Topic::Payment, fields("PAYMENT_CAPTURED"))
        .await
        .unwrap();

    assert_eq!(first, EntryId::new(1));
    assert_eq!(second, EntryId::new(2));
    assert_eq!(payment, EntryId::new(1));

    let entries = log.range(Topic::Order).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].field("type"), Some("ORDER_CREATED"));
    assert_eq!(log.len(Topic::Payment).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn append_rejects_empty_fields() {
    let log = get_test_log().await;
    let result = log.append(Topic::Order, Fields::new()).await;
    assert!(matches!(result, Err(EventLogError::EmptyEntry)));
}

#[tokio::test]
#[serial]
async fn concurrent_appends_keep_ids_unique_and_dense() {
    let log = get_test_log().await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let log = log.clone();
        handles.push(tokio::spawn(async move {
            log.append(Topic::Order, fields(&format!("E{i}"))).await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().as_u64());
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<u64>>());
}

#[tokio::test]
#[serial]
async fn group_read_ack_and_pending() {
    let log = get_test_log().await;
    log.append(Topic::Order, fields("A")).await.unwrap();
    log.append(Topic::Order, fields("B")).await.unwrap();

    let entries = log
        .read_group("notifications", "c1", &[Topic::Order], &immediate())
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].deliveries, 1);

    let pending = log.pending(Topic::Order, "notifications").await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].consumer, "c1");

    let acked = log
        .ack(Topic::Order, "notifications", &[entries[0].id])
        .await
        .unwrap();
    assert_eq!(acked, 1);

    let pending = log.pending(Topic::Order, "notifications").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, entries[1].id);

    let again = log
        .read_group("notifications", "c1", &[Topic::Order], &immediate())
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
#[serial]
async fn competing_consumers_split_entries() {
    let log = get_test_log().await;
    for i in 0..6 {
        log.append(Topic::Payment, fields(&format!("E{i}")))
            .await
            .unwrap();
    }

    let options = immediate().count(3);
    let (a, b) = tokio::join!(
        log.read_group("g", "c1", &[Topic::Payment], &options),
        log.read_group("g", "c2", &[Topic::Payment], &options),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(a.len() + b.len(), 6);
    assert!(a.iter().all(|x| b.iter().all(|y| x.id != y.id)));
}

#[tokio::test]
#[serial]
async fn idle_entries_are_redelivered_then_dead_lettered() {
    let log = get_test_log().await;
    log.append(Topic::Order, fields("POISON")).await.unwrap();

    let options = immediate()
        .min_idle(Duration::ZERO)
        .max_deliveries(Some(2));

    let first = log
        .read_group("g", "c1", &[Topic::Order], &options)
        .await
        .unwrap();
    assert_eq!(first[0].deliveries, 1);

    let second = log
        .read_group("g", "c2", &[Topic::Order], &options)
        .await
        .unwrap();
    assert_eq!(second[0].deliveries, 2);

    let third = log
        .read_group("g", "c1", &[Topic::Order], &options)
        .await
        .unwrap();
    assert!(third.is_empty());
    assert!(log.pending(Topic::Order, "g").await.unwrap().is_empty());

    let dead = log.range(Topic::DeadLetter).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].field("sourceTopic"), Some("ORDER"));
    assert_eq!(dead[0].field("sourceId"), Some("1"));
    assert_eq!(dead[0].field("group"), Some("g"));
}

#[tokio::test]
#[serial]
async fn blocked_read_picks_up_late_append() {
    let log = get_test_log().await;
    let reader = log.clone();

    let handle = tokio::spawn(async move {
        let options = ReadOptions::new().block(Duration::from_secs(3));
        reader
            .read_group("g", "c1", &[Topic::Order], &options)
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    log.append(Topic::Order, fields("LATE")).await.unwrap();

    let entries = handle.await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].field("type"), Some("LATE"));
}
