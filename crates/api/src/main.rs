//! API server entry point.

use std::sync::Arc;

use api::Backends;
use api::config::{Config, LogFormat};
use common::ServiceTokenSigner;
use domain::Money;
use event_log::{InMemoryEventLog, PostgresEventLog};
use inventory::{
    HttpInventoryClient, InMemoryInventoryLedger, InventoryLedger, PostgresInventoryLedger,
};
use saga::{
    InMemoryProductCatalog, InMemoryStore, PostgresProductCatalog, PostgresStore,
    SandboxPaymentProvider,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Remote ledger when `INVENTORY_URL` is set, otherwise `local`.
fn ledger(config: &Config, local: Arc<dyn InventoryLedger>) -> Arc<dyn InventoryLedger> {
    match &config.inventory_url {
        Some(url) => {
            let signer = ServiceTokenSigner::new(
                config.service_token_secret.as_bytes(),
                config.service_name.clone(),
            );
            let client = HttpInventoryClient::new(url.clone(), signer, config.inventory_timeout)
                .expect("failed to build inventory client");
            tracing::info!(%url, "using remote inventory ledger");
            Arc::new(client)
        }
        None => local,
    }
}

async fn postgres_backends(config: &Config, url: &str) -> Backends {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to database");

    let store = PostgresStore::new(pool.clone());
    store.run_migrations().await.expect("migrations failed");
    tracing::info!("connected to Postgres, migrations applied");

    let store = Arc::new(store);
    Backends {
        ledger: ledger(config, Arc::new(PostgresInventoryLedger::new(pool.clone()))),
        catalog: Arc::new(PostgresProductCatalog::new(pool.clone())),
        orders: store.clone(),
        payments: store.clone(),
        idempotency: store.clone(),
        reservations: store,
        log: Arc::new(PostgresEventLog::new(pool)),
        provider: Arc::new(SandboxPaymentProvider::new(config.payment_provider.clone())),
    }
}

/// In-memory stores with a small demo catalog, for local runs.
async fn in_memory_backends(config: &Config) -> Backends {
    let catalog = InMemoryProductCatalog::new();
    catalog
        .add_product("SKU-1", "Widget", Money::from_minor_units(10_000))
        .await;
    catalog
        .add_product("SKU-2", "Gadget", Money::from_minor_units(2_550))
        .await;
    let local = InMemoryInventoryLedger::with_stock([("SKU-1", 100), ("SKU-2", 50)]);
    tracing::warn!("DATABASE_URL not set, using in-memory stores with demo products");

    let store = Arc::new(InMemoryStore::new());
    Backends {
        ledger: ledger(config, Arc::new(local)),
        catalog: Arc::new(catalog),
        orders: store.clone(),
        payments: store.clone(),
        idempotency: store.clone(),
        reservations: store,
        log: Arc::new(InMemoryEventLog::new()),
        provider: Arc::new(SandboxPaymentProvider::new(config.payment_provider.clone())),
    }
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);
    for name in config.dev_secrets() {
        tracing::warn!(variable = name, "using the public development secret");
    }

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Storage and application state
    let backends = match &config.database_url {
        Some(url) => postgres_backends(&config, url).await,
        None => in_memory_backends(&config).await,
    };
    let state = api::create_state(&config, &backends);

    // 4. Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = api::spawn_workers(&config, &backends, shutdown_rx);

    // 5. Build the application
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, provider = %config.payment_provider, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop workers
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "worker task failed");
        }
    }

    tracing::info!("server shut down gracefully");
}
