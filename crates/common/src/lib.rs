//! Shared types for the order-fulfillment services.
//!
//! - strongly typed identifiers ([`OrderId`], [`UserId`], ...)
//! - the validated caller identity ([`AuthContext`])
//! - short-lived signed tokens for service-to-service calls

pub mod auth;
pub mod token;
pub mod types;

pub use auth::{AuthContext, Role};
pub use token::{
    ServiceClaims, ServiceTokenSigner, ServiceTokenVerifier, TokenError, UserTokenVerifier,
};
pub use types::{AddressId, OrderId, PaymentId, ProductId, RequestId, ReservationId, UserId};
