//! HTTP surface of the order-fulfillment saga.
//!
//! Exposes the inventory ledger to internal services, order placement and
//! payment intents to customers, and the provider webhook. Structured
//! logging (tracing) and Prometheus metrics throughout.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use common::{ServiceTokenVerifier, UserTokenVerifier};
use event_log::{ConsumerConfig, EventConsumer, EventLog, ReadOptions, Topic};
use inventory::InventoryLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    GatewayConfig, IdempotencyStore, LoggingDispatcher, NotificationHandler, OrderCoordinator,
    OrderRepository, PaymentGateway, PaymentProvider, PaymentRepository, ProductCatalog,
    ReservationReconciler, ReservationStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: OrderCoordinator,
    pub gateway: PaymentGateway,
    pub ledger: Arc<dyn InventoryLedger>,
    pub user_tokens: UserTokenVerifier,
    pub service_tokens: ServiceTokenVerifier,
    /// Header carrying the provider's webhook signature.
    pub signature_header: String,
}

/// Storage and collaborator handles the process is built from.
///
/// `main` picks Postgres or in-memory implementations; everything below
/// only sees the traits.
#[derive(Clone)]
pub struct Backends {
    pub ledger: Arc<dyn InventoryLedger>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub reservations: Arc<dyn ReservationStore>,
    pub log: Arc<dyn EventLog>,
    pub provider: Arc<dyn PaymentProvider>,
}

/// Wires the saga services over `backends`.
pub fn create_state(config: &Config, backends: &Backends) -> Arc<AppState> {
    let coordinator = OrderCoordinator::new(
        backends.ledger.clone(),
        backends.catalog.clone(),
        backends.orders.clone(),
        backends.reservations.clone(),
        backends.log.clone(),
        config.inventory_timeout,
    );

    let gateway = PaymentGateway::new(
        backends.orders.clone(),
        backends.payments.clone(),
        backends.idempotency.clone(),
        backends.ledger.clone(),
        backends.provider.clone(),
        backends.log.clone(),
        GatewayConfig {
            webhook_secret: config.webhook_secret.clone(),
            key_id: config.payment_key_id.clone(),
            currency: config.currency.clone(),
            inventory_timeout: config.inventory_timeout,
        },
    );

    Arc::new(AppState {
        coordinator,
        gateway,
        ledger: backends.ledger.clone(),
        user_tokens: UserTokenVerifier::new(config.user_token_secret.as_bytes()),
        service_tokens: ServiceTokenVerifier::new(config.service_token_secret.as_bytes()),
        signature_header: config.signature_header(),
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/inventory/reserve", post(routes::inventory::reserve))
        .route("/inventory/release", post(routes::inventory::release))
        .route("/inventory/deduct", post(routes::inventory::deduct))
        .route(
            "/inventory/{product_id}",
            get(routes::inventory::get).put(routes::inventory::set_stock),
        )
        .route(
            "/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route("/orders/{id}", get(routes::orders::get))
        .route("/payments/intent", post(routes::payments::create_intent))
        .route("/webhooks/payment", post(routes::webhooks::payment))
        .with_state(state)
        .merge(metrics_router)
        .layer(middleware::from_fn(extract::request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Starts the notification consumer and the reservation reconciler.
///
/// Both stop once `shutdown` flips to `true`.
pub fn spawn_workers(
    config: &Config,
    backends: &Backends,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let read = ReadOptions::new()
        .count(config.consumer_batch)
        .block(config.consumer_block)
        .min_idle(config.consumer_min_idle)
        .max_deliveries(config.consumer_max_deliveries);
    let consumer = EventConsumer::new(
        backends.log.clone(),
        NotificationHandler::new(Arc::new(LoggingDispatcher), backends.idempotency.clone()),
        ConsumerConfig::new(
            config.consumer_group.clone(),
            config.consumer_name.clone(),
            vec![Topic::Order, Topic::Payment],
        )
        .with_read_options(read),
    );

    let reconciler = ReservationReconciler::new(
        backends.reservations.clone(),
        backends.ledger.clone(),
        config.reservation_timeout,
        config.inventory_timeout,
    );
    let interval = config.reconcile_interval;

    let consumer_shutdown = shutdown.clone();
    vec![
        tokio::spawn(async move { consumer.run(consumer_shutdown).await }),
        tokio::spawn(async move { reconciler.run(interval, shutdown).await }),
    ]
}
