//! Domain events carried on the event log.
//!
//! Events travel as flat string maps with a `type` key so any consumer can
//! read them without sharing this crate.

use common::{OrderId, PaymentId, RequestId, UserId};
use event_log::{Fields, Topic};

use crate::{DomainError, Money, Result};

/// Events emitted by the order-fulfillment saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// An order was persisted with its stock reserved.
    OrderCreated {
        order_id: OrderId,
        user_id: UserId,
        total_amount: Money,
        request_id: RequestId,
    },

    /// The provider captured payment and stock was deducted.
    PaymentCaptured {
        order_id: OrderId,
        user_id: UserId,
        payment_id: PaymentId,
        provider_payment_id: String,
        amount: Money,
        request_id: RequestId,
    },

    /// The provider reported a failed payment and stock was released.
    PaymentFailed {
        order_id: OrderId,
        user_id: UserId,
        provider_payment_id: String,
        reason: String,
        request_id: RequestId,
    },
}

impl DomainEvent {
    pub const ORDER_CREATED: &'static str = "ORDER_CREATED";
    pub const PAYMENT_CAPTURED: &'static str = "PAYMENT_CAPTURED";
    pub const PAYMENT_FAILED: &'static str = "PAYMENT_FAILED";

    /// Returns the wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated { .. } => Self::ORDER_CREATED,
            DomainEvent::PaymentCaptured { .. } => Self::PAYMENT_CAPTURED,
            DomainEvent::PaymentFailed { .. } => Self::PAYMENT_FAILED,
        }
    }

    /// Returns the topic the event is appended to.
    pub fn topic(&self) -> Topic {
        match self {
            DomainEvent::OrderCreated { .. } => Topic::Order,
            DomainEvent::PaymentCaptured { .. } | DomainEvent::PaymentFailed { .. } => {
                Topic::Payment
            }
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            DomainEvent::OrderCreated { order_id, .. }
            | DomainEvent::PaymentCaptured { order_id, .. }
            | DomainEvent::PaymentFailed { order_id, .. } => *order_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            DomainEvent::OrderCreated { user_id, .. }
            | DomainEvent::PaymentCaptured { user_id, .. }
            | DomainEvent::PaymentFailed { user_id, .. } => *user_id,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            DomainEvent::OrderCreated { request_id, .. }
            | DomainEvent::PaymentCaptured { request_id, .. }
            | DomainEvent::PaymentFailed { request_id, .. } => request_id,
        }
    }

    /// Encodes the event as a flat key/value map.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        let mut put = |key: &str, value: String| {
            fields.insert(key.to_string(), value);
        };

        put("type", self.event_type().to_string());
        put("orderId", self.order_id().to_string());
        put("userId", self.user_id().to_string());
        put("requestId", self.request_id().to_string());

        match self {
            DomainEvent::OrderCreated { total_amount, .. } => {
                put("totalAmount", total_amount.to_string());
            }
            DomainEvent::PaymentCaptured {
                payment_id,
                provider_payment_id,
                amount,
                ..
            } => {
                put("paymentId", payment_id.to_string());
                put("providerPaymentId", provider_payment_id.clone());
                put("amount", amount.to_string());
            }
            DomainEvent::PaymentFailed {
                provider_payment_id,
                reason,
                ..
            } => {
                put("providerPaymentId", provider_payment_id.clone());
                put("reason", reason.clone());
            }
        }

        fields
    }

    /// Decodes an event from a flat key/value map.
    pub fn from_fields(fields: &Fields) -> Result<Self> {
        let event_type = required(fields, "type")?;
        let order_id = uuid_field(fields, "orderId", OrderId::parse)?;
        let user_id = uuid_field(fields, "userId", UserId::parse)?;
        // Entries written without a request id still decode.
        let request_id = fields
            .get("requestId")
            .map(|r| RequestId::new(r.clone()))
            .unwrap_or_default();

        match event_type {
            Self::ORDER_CREATED => Ok(DomainEvent::OrderCreated {
                order_id,
                user_id,
                total_amount: money_field(fields, "totalAmount")?,
                request_id,
            }),
            Self::PAYMENT_CAPTURED => Ok(DomainEvent::PaymentCaptured {
                order_id,
                user_id,
                payment_id: uuid_field(fields, "paymentId", PaymentId::parse)?,
                provider_payment_id: required(fields, "providerPaymentId")?.to_string(),
                amount: money_field(fields, "amount")?,
                request_id,
            }),
            Self::PAYMENT_FAILED => Ok(DomainEvent::PaymentFailed {
                order_id,
                user_id,
                provider_payment_id: required(fields, "providerPaymentId")?.to_string(),
                reason: fields.get("reason").cloned().unwrap_or_default(),
                request_id,
            }),
            other => Err(DomainError::UnknownEventType(other.to_string())),
        }
    }
}

fn required<'a>(fields: &'a Fields, key: &'static str) -> Result<&'a str> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or(DomainError::MissingField(key))
}

fn uuid_field<T>(
    fields: &Fields,
    key: &'static str,
    parse: fn(&str) -> std::result::Result<T, uuid::Error>,
) -> Result<T> {
    let raw = required(fields, key)?;
    parse(raw).map_err(|_| DomainError::InvalidField {
        field: key,
        value: raw.to_string(),
    })
}

fn money_field(fields: &Fields, key: &'static str) -> Result<Money> {
    let raw = required(fields, key)?;
    raw.parse().map_err(|_| DomainError::InvalidField {
        field: key,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_created_wire_format() {
        let order_id = OrderId::new();
        let event = DomainEvent::OrderCreated {
            order_id,
            user_id: UserId::new(),
            total_amount: "200".parse().unwrap(),
            request_id: RequestId::new("req-1"),
        };

        let fields = event.to_fields();
        assert_eq!(fields["type"], "ORDER_CREATED");
        assert_eq!(fields["orderId"], order_id.to_string());
        assert_eq!(fields["totalAmount"], "200.00");
        assert_eq!(fields["requestId"], "req-1");
        assert_eq!(event.topic(), Topic::Order);

        assert_eq!(DomainEvent::from_fields(&fields).unwrap(), event);
    }

    #[test]
    fn payment_events_go_to_payment_topic() {
        let failed = DomainEvent::PaymentFailed {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            provider_payment_id: "pay_1".to_string(),
            reason: "card declined".to_string(),
            request_id: RequestId::generate(),
        };
        assert_eq!(failed.topic(), Topic::Payment);
        assert_eq!(failed.to_fields()["reason"], "card declined");
    }

    #[test]
    fn decoding_reports_what_is_wrong() {
        let mut fields = Fields::new();
        fields.insert("type".to_string(), "ORDER_SHIPPED".to_string());
        fields.insert("orderId".to_string(), OrderId::new().to_string());
        fields.insert("userId".to_string(), UserId::new().to_string());
        assert_eq!(
            DomainEvent::from_fields(&fields).unwrap_err(),
            DomainError::UnknownEventType("ORDER_SHIPPED".to_string())
        );

        fields.insert("type".to_string(), "ORDER_CREATED".to_string());
        assert_eq!(
            DomainEvent::from_fields(&fields).unwrap_err(),
            DomainError::MissingField("totalAmount")
        );

        fields.insert("orderId".to_string(), "nope".to_string());
        assert!(matches!(
            DomainEvent::from_fields(&fields),
            Err(DomainError::InvalidField { field: "orderId", .. })
        ));
    }
}
