//! Domain layer for the order-fulfillment saga.
//!
//! This crate provides the records the saga moves between services:
//! - `Money` as a two-digit fixed-point decimal
//! - `Order` and `OrderItem` with the order status state machine
//! - `Payment` records tracked against the payment provider
//! - `DomainEvent`, the flat key/value messages written to the event log

pub mod error;
pub mod events;
pub mod money;
pub mod order;
pub mod payment;

pub use error::{DomainError, Result};
pub use events::DomainEvent;
pub use money::Money;
pub use order::{Order, OrderItem, OrderStatus, PaymentStatus};
pub use payment::{Payment, PaymentState};
