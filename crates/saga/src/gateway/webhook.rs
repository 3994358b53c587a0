//! Provider webhook payloads.

use serde::Deserialize;

pub const PAYMENT_CAPTURED: &str = "payment.captured";
pub const PAYMENT_FAILED: &str = "payment.failed";

/// The payment entity carried by payment webhooks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentEntity {
    /// Provider payment id, e.g. `pay_...`.
    pub id: String,
    /// Provider order id the payment was made against.
    pub order_id: String,
    /// Amount in minor units.
    pub amount: i64,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// A verified webhook, classified by event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Captured(PaymentEntity),
    Failed(PaymentEntity),
    /// Any event this adapter does not act on.
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct PaymentPayload {
    payment: PaymentWrapper,
}

#[derive(Deserialize)]
struct PaymentWrapper {
    entity: PaymentEntity,
}

/// Parses a raw webhook body.
///
/// Only payment events need a well-formed payment entity; other events are
/// classified by name alone.
pub fn parse(body: &[u8]) -> Result<WebhookEvent, serde_json::Error> {
    let envelope: Envelope = serde_json::from_slice(body)?;

    let entity = match envelope.event.as_str() {
        PAYMENT_CAPTURED | PAYMENT_FAILED => {
            let payload: PaymentPayload = serde_json::from_value(envelope.payload)?;
            payload.payment.entity
        }
        _ => return Ok(WebhookEvent::Other(envelope.event)),
    };

    if entity.id.is_empty() || entity.order_id.is_empty() {
        return Err(serde::de::Error::custom("payment entity is missing ids"));
    }

    Ok(if envelope.event == PAYMENT_CAPTURED {
        WebhookEvent::Captured(entity)
    } else {
        WebhookEvent::Failed(entity)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_captured_payment() {
        let body = br#"{
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_1", "order_id": "order_1", "amount": 20000}}}
        }"#;

        let WebhookEvent::Captured(entity) = parse(body).unwrap() else {
            panic!("expected a captured event");
        };
        assert_eq!(entity.id, "pay_1");
        assert_eq!(entity.order_id, "order_1");
        assert_eq!(entity.amount, 20000);
        assert_eq!(entity.error_description, None);
    }

    #[test]
    fn parses_failure_description() {
        let body = br#"{
            "event": "payment.failed",
            "payload": {"payment": {"entity": {
                "id": "pay_2", "order_id": "order_2", "amount": 500,
                "error_description": "card declined"
            }}}
        }"#;

        let WebhookEvent::Failed(entity) = parse(body).unwrap() else {
            panic!("expected a failed event");
        };
        assert_eq!(entity.error_description.as_deref(), Some("card declined"));
    }

    #[test]
    fn other_events_need_no_payload() {
        assert_eq!(
            parse(br#"{"event": "refund.created"}"#).unwrap(),
            WebhookEvent::Other("refund.created".to_string())
        );
    }

    #[test]
    fn malformed_bodies_are_errors() {
        assert!(parse(b"not json").is_err());
        assert!(parse(br#"{"event": "payment.captured"}"#).is_err());
        assert!(parse(br#"{"event": "payment.captured", "payload": {"payment": {"entity": {"id": "", "order_id": "o", "amount": 1}}}}"#).is_err());
    }
}
