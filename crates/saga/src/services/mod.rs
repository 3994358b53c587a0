//! External collaborator traits and their local implementations.

pub mod catalog;
pub mod notification;
pub mod payment;

pub use catalog::{InMemoryProductCatalog, PostgresProductCatalog, ProductCatalog, ProductSnapshot};
pub use notification::{LoggingDispatcher, NotificationDispatcher};
pub use payment::{PaymentProvider, ProviderOrder, SandboxPaymentProvider};
