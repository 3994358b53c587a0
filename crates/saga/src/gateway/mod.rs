//! Payment gateway adapter.
//!
//! Issues payment intents against the provider and applies the provider's
//! asynchronous verdict, delivered by webhook, to the order, the payment
//! record and the inventory ledger.

mod signature;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use common::{AuthContext, OrderId, RequestId};
use domain::{DomainEvent, Money, Order, OrderStatus, Payment, PaymentState, PaymentStatus};
use event_log::EventLog;
use inventory::{DeductStatus, InventoryItem, InventoryLedger, ReleaseStatus};
use serde::Serialize;

use crate::error::{Result, SagaError};
use crate::services::PaymentProvider;
use crate::store::{IdempotencyStore, OrderRepository, PaymentRepository};

pub use signature::WebhookVerifier;
use webhook::{PaymentEntity, WebhookEvent};

/// How long a processed webhook's idempotency key is kept.
pub const WEBHOOK_KEY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub webhook_secret: String,
    /// Public key id handed to clients with each intent.
    pub key_id: String,
    pub currency: String,
    pub inventory_timeout: Duration,
}

/// What the client needs to start the provider checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub provider_order_id: String,
    /// Amount in minor units.
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

/// Why a webhook was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidSignature,
    MalformedPayload,
}

/// Result of handling one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The verdict was applied (side-effect failures are logged, not
    /// reported back to the provider).
    Processed,
    /// This provider payment was already handled.
    AlreadyProcessed,
    /// An event this adapter does not act on.
    Ignored,
    Rejected(RejectReason),
}

impl WebhookOutcome {
    /// Status string returned to the provider.
    pub fn status(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "ok",
            WebhookOutcome::AlreadyProcessed => "already_processed",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Rejected(_) => "rejected",
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::AlreadyProcessed => "already_processed",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Rejected(RejectReason::InvalidSignature) => "invalid_signature",
            WebhookOutcome::Rejected(RejectReason::MalformedPayload) => "malformed_payload",
        }
    }
}

/// The payment side of the saga.
pub struct PaymentGateway {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    ledger: Arc<dyn InventoryLedger>,
    provider: Arc<dyn PaymentProvider>,
    log: Arc<dyn EventLog>,
    verifier: WebhookVerifier,
    config: GatewayConfig,
}

impl PaymentGateway {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentRepository>,
        idempotency: Arc<dyn IdempotencyStore>,
        ledger: Arc<dyn InventoryLedger>,
        provider: Arc<dyn PaymentProvider>,
        log: Arc<dyn EventLog>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            orders,
            payments,
            idempotency,
            ledger,
            provider,
            log,
            verifier: WebhookVerifier::new(config.webhook_secret.as_bytes()),
            config,
        }
    }

    /// Name of the configured provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Returns the provider checkout details for the caller's order,
    /// creating a provider order on first use.
    #[tracing::instrument(
        skip(self, auth),
        fields(user_id = %auth.user_id, request_id = %request_id)
    )]
    pub async fn create_payment_intent(
        &self,
        order_id: OrderId,
        auth: &AuthContext,
        request_id: &RequestId,
    ) -> Result<PaymentIntent> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .filter(|order| order.is_owned_by(auth.user_id))
            .ok_or_else(|| SagaError::NotFound(format!("order {order_id}")))?;

        if order.payment_status == PaymentStatus::Paid {
            return Err(SagaError::AlreadyPaid);
        }
        if !order.status.can_transition_to(OrderStatus::Confirmed) {
            return Err(SagaError::InvalidState(format!("order is {}", order.status)));
        }

        if let Some(existing) = self.payments.find_initiated_for_order(order.id).await? {
            tracing::debug!(
                provider_order_id = %existing.provider_order_id,
                "Reusing payment intent"
            );
            return self.intent_for(&existing);
        }

        let amount = order.total_amount.to_minor_units().ok_or_else(|| {
            SagaError::Validation(format!("order total {} is out of range", order.total_amount))
        })?;
        let provider_order = self
            .provider
            .create_order(amount, &self.config.currency, &order.id.to_string())
            .await?;

        let payment = Payment::initiated(
            order.id,
            self.provider.name(),
            provider_order.provider_order_id,
            order.total_amount,
            provider_order.currency,
        );
        self.payments.insert(&payment).await?;

        metrics::counter!("payment_intents_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            provider_order_id = %payment.provider_order_id,
            "Payment intent created"
        );
        self.intent_for(&payment)
    }

    fn intent_for(&self, payment: &Payment) -> Result<PaymentIntent> {
        let amount = payment.amount.to_minor_units().ok_or_else(|| {
            SagaError::Validation(format!("payment amount {} is out of range", payment.amount))
        })?;
        Ok(PaymentIntent {
            provider_order_id: payment.provider_order_id.clone(),
            amount,
            currency: payment.currency.clone(),
            key_id: self.config.key_id.clone(),
        })
    }

    /// Handles one webhook delivery.
    ///
    /// Returns an error only when the idempotency key could not be claimed;
    /// the provider will then redeliver. Once the key is claimed the
    /// delivery is `Processed` even if a later step fails.
    #[tracing::instrument(skip(self, body, signature), fields(request_id = %request_id))]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
        request_id: &RequestId,
    ) -> Result<WebhookOutcome> {
        let outcome = self.dispatch_webhook(body, signature, request_id).await?;
        metrics::counter!("webhooks_received_total", "outcome" => outcome.metric_label())
            .increment(1);
        Ok(outcome)
    }

    async fn dispatch_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
        request_id: &RequestId,
    ) -> Result<WebhookOutcome> {
        if !self.verifier.verify(body, signature) {
            tracing::warn!("Webhook signature verification failed");
            return Ok(WebhookOutcome::Rejected(RejectReason::InvalidSignature));
        }

        let event = match webhook::parse(body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed webhook payload");
                return Ok(WebhookOutcome::Rejected(RejectReason::MalformedPayload));
            }
        };

        let (captured, entity) = match event {
            WebhookEvent::Captured(entity) => (true, entity),
            WebhookEvent::Failed(entity) => (false, entity),
            WebhookEvent::Other(name) => {
                tracing::info!(event = %name, "Ignoring webhook event");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let key = format!("payment:webhook:{}", entity.id);
        if !self.idempotency.try_claim(&key, WEBHOOK_KEY_TTL).await? {
            tracing::info!(provider_payment_id = %entity.id, "Webhook already processed");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let applied = if captured {
            self.apply_captured(&entity, request_id).await
        } else {
            self.apply_failed(&entity, request_id).await
        };
        if let Err(e) = applied {
            tracing::error!(
                error = %e,
                provider_payment_id = %entity.id,
                provider_order_id = %entity.order_id,
                request_id = %request_id,
                "Failed to apply payment webhook"
            );
            metrics::counter!(
                "webhook_processing_failures_total",
                "event" => if captured { "captured" } else { "failed" }
            )
            .increment(1);
        }

        Ok(WebhookOutcome::Processed)
    }

    async fn load(&self, entity: &PaymentEntity) -> Result<(Payment, Order)> {
        let payment = self
            .payments
            .find_by_provider_order_id(&entity.order_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("payment for {}", entity.order_id)))?;
        let order = self
            .orders
            .get(payment.order_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("order {}", payment.order_id)))?;
        Ok((payment, order))
    }

    async fn apply_captured(&self, entity: &PaymentEntity, request_id: &RequestId) -> Result<()> {
        let (payment, order) = self.load(entity).await?;

        if Money::from_minor_units(entity.amount) != payment.amount {
            tracing::warn!(
                order_id = %order.id,
                expected = %payment.amount,
                received = entity.amount,
                "Captured amount does not match payment"
            );
        }

        let mut next = order.clone();
        let confirmed = match next.confirm_payment() {
            Ok(()) => self.persist_transition(&order, &next).await?,
            Err(e) => {
                tracing::debug!(error = %e, order_id = %order.id, "Capture does not apply");
                false
            }
        };
        self.settle(&payment, PaymentState::Successful, &entity.id).await;

        if !confirmed {
            tracing::warn!(
                order_id = %order.id,
                status = %order.status,
                "Order is not pending, skipping confirmation side effects"
            );
            return Ok(());
        }

        let items = inventory_items(&order);
        match tokio::time::timeout(
            self.config.inventory_timeout,
            self.ledger.deduct(&items, request_id),
        )
        .await
        {
            Ok(Ok(results)) => {
                for result in results.iter().filter(|r| r.status != DeductStatus::Deducted) {
                    tracing::warn!(
                        order_id = %order.id,
                        product_id = %result.product_id,
                        status = result.status.as_str(),
                        "Stock was not deducted"
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, order_id = %order.id, "Inventory deduct failed");
                metrics::counter!("webhook_inventory_failures_total", "operation" => "deduct")
                    .increment(1);
            }
            Err(_) => {
                tracing::error!(order_id = %order.id, "Inventory deduct timed out");
                metrics::counter!("webhook_inventory_failures_total", "operation" => "deduct")
                    .increment(1);
            }
        }

        let event = DomainEvent::PaymentCaptured {
            order_id: order.id,
            user_id: order.user_id,
            payment_id: payment.id,
            provider_payment_id: entity.id.clone(),
            amount: payment.amount,
            request_id: request_id.clone(),
        };
        self.log.append(event.topic(), event.to_fields()).await?;

        tracing::info!(order_id = %order.id, "Payment captured, order confirmed");
        Ok(())
    }

    async fn apply_failed(&self, entity: &PaymentEntity, request_id: &RequestId) -> Result<()> {
        let (payment, order) = self.load(entity).await?;

        let mut next = order.clone();
        let failed = match next.fail_payment() {
            Ok(()) => self.persist_transition(&order, &next).await?,
            Err(e) => {
                tracing::debug!(error = %e, order_id = %order.id, "Failure does not apply");
                false
            }
        };
        self.settle(&payment, PaymentState::Failed, &entity.id).await;

        if !failed {
            tracing::warn!(
                order_id = %order.id,
                status = %order.status,
                "Order is not pending, skipping failure side effects"
            );
            return Ok(());
        }

        let items = inventory_items(&order);
        match tokio::time::timeout(
            self.config.inventory_timeout,
            self.ledger.release(&items, request_id),
        )
        .await
        {
            Ok(Ok(results)) => {
                for result in results.iter().filter(|r| r.status != ReleaseStatus::Released) {
                    tracing::warn!(
                        order_id = %order.id,
                        product_id = %result.product_id,
                        status = result.status.as_str(),
                        "Stock was not released"
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, order_id = %order.id, "Inventory release failed");
                metrics::counter!("webhook_inventory_failures_total", "operation" => "release")
                    .increment(1);
            }
            Err(_) => {
                tracing::error!(order_id = %order.id, "Inventory release timed out");
                metrics::counter!("webhook_inventory_failures_total", "operation" => "release")
                    .increment(1);
            }
        }

        let event = DomainEvent::PaymentFailed {
            order_id: order.id,
            user_id: order.user_id,
            provider_payment_id: entity.id.clone(),
            reason: entity
                .error_description
                .clone()
                .unwrap_or_else(|| "payment failed".to_string()),
            request_id: request_id.clone(),
        };
        self.log.append(event.topic(), event.to_fields()).await?;

        tracing::info!(order_id = %order.id, "Payment failed, order failed");
        Ok(())
    }

    /// Writes `next`'s status if the stored order is still in `current`'s.
    async fn persist_transition(&self, current: &Order, next: &Order) -> Result<bool> {
        self.orders
            .update_status(current.id, current.status, next.status, next.payment_status)
            .await
    }

    /// Records the provider outcome on the payment row.
    ///
    /// Failures are logged rather than returned: by now the order status
    /// has moved and its stock and event side effects must still run.
    async fn settle(&self, payment: &Payment, state: PaymentState, provider_payment_id: &str) {
        match self
            .payments
            .complete(payment.id, state, Some(provider_payment_id))
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                payment_id = %payment.id,
                status = %payment.status,
                "Payment was already settled"
            ),
            Err(e) => {
                tracing::error!(error = %e, payment_id = %payment.id, "Failed to settle payment");
                metrics::counter!("payment_settle_failures_total").increment(1);
            }
        }
    }
}

fn inventory_items(order: &Order) -> Vec<InventoryItem> {
    order
        .items
        .iter()
        .map(|item| InventoryItem::new(item.product_id.clone(), item.quantity))
        .collect()
}
