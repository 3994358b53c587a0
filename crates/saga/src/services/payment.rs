//! Payment provider trait and sandbox implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Result, SagaError};

/// An order created at the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOrder {
    pub provider_order_id: String,
    /// Amount in minor units (paise, cents).
    pub amount: i64,
    pub currency: String,
}

/// The provider's order API.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name recorded on payments, e.g. `razorpay`.
    fn name(&self) -> &str;

    /// Creates a provider order the client can pay against.
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<ProviderOrder>;
}

/// Provider stand-in that issues local order ids.
#[derive(Debug, Clone)]
pub struct SandboxPaymentProvider {
    name: String,
    fail: Arc<AtomicBool>,
    created: Arc<AtomicU32>,
}

impl SandboxPaymentProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail: Arc::new(AtomicBool::new(false)),
            created: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Configures the provider to reject order creation.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns how many provider orders were created.
    pub fn orders_created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for SandboxPaymentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<ProviderOrder> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SagaError::Dependency(
                "payment provider unavailable".to_string(),
            ));
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(amount, currency, receipt, "Sandbox provider order created");
        Ok(ProviderOrder {
            provider_order_id: format!("order_{}", Uuid::new_v4().simple()),
            amount,
            currency: currency.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_order() {
        let provider = SandboxPaymentProvider::new("razorpay");
        let order = provider.create_order(20000, "INR", "rcpt").await.unwrap();

        assert!(order.provider_order_id.starts_with("order_"));
        assert_eq!(order.amount, 20000);
        assert_eq!(provider.orders_created(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_create() {
        let provider = SandboxPaymentProvider::new("razorpay");
        provider.set_fail(true);

        let result = provider.create_order(100, "INR", "rcpt").await;
        assert!(matches!(result, Err(SagaError::Dependency(_))));
        assert_eq!(provider.orders_created(), 0);
    }
}
