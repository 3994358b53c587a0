//! Payment records kept against the external provider.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::{DomainError, Money};

/// Lifecycle of a provider payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    #[default]
    Initiated,
    Successful,
    Failed,
    Refunded,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Initiated => "initiated",
            PaymentState::Successful => "successful",
            PaymentState::Failed => "failed",
            PaymentState::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(PaymentState::Initiated),
            "successful" => Ok(PaymentState::Successful),
            "failed" => Ok(PaymentState::Failed),
            "refunded" => Ok(PaymentState::Refunded),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// A payment attempt for an order.
///
/// Created as `initiated` when the intent is issued and updated at most once
/// by a verified webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub provider: String,
    pub provider_order_id: String,
    pub provider_payment_id: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates an `initiated` payment for a provider order.
    pub fn initiated(
        order_id: OrderId,
        provider: impl Into<String>,
        provider_order_id: impl Into<String>,
        amount: Money,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            order_id,
            provider: provider.into(),
            provider_order_id: provider_order_id.into(),
            provider_payment_id: None,
            amount,
            currency: currency.into(),
            status: PaymentState::Initiated,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_initiated(&self) -> bool {
        self.status == PaymentState::Initiated
    }
}
