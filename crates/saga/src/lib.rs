//! Order-fulfillment saga.
//!
//! The saga has no shared transaction. Consistency comes from compensation
//! and idempotency keys:
//! 1. [`OrderCoordinator`] reserves stock item by item, persists the order
//!    and appends `ORDER_CREATED`. Any failure releases what was reserved.
//! 2. [`PaymentGateway`] verifies provider webhooks, claims an idempotency
//!    key per provider payment and then confirms (deduct) or fails (release)
//!    the order, appending the outcome to the event log.
//! 3. [`NotificationHandler`] consumes the log and notifies the customer at
//!    most once per entry.
//! 4. [`ReservationReconciler`] releases reservations left behind by
//!    attempts that never finished.

pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod notifications;
pub mod reservations;
pub mod services;
pub mod store;

pub use coordinator::OrderCoordinator;
pub use error::{Result, SagaError};
pub use gateway::{
    GatewayConfig, PaymentGateway, PaymentIntent, RejectReason, WebhookOutcome, WebhookVerifier,
};
pub use notifications::NotificationHandler;
pub use reservations::{AttemptStatus, ReconcileStats, ReservationAttempt, ReservationReconciler};
pub use services::{
    InMemoryProductCatalog, LoggingDispatcher, NotificationDispatcher, PaymentProvider,
    PostgresProductCatalog, ProductCatalog, ProductSnapshot, ProviderOrder,
    SandboxPaymentProvider,
};
pub use store::{
    IdempotencyStore, InMemoryStore, OrderRepository, PaymentRepository, PostgresStore,
    ReservationStore,
};
