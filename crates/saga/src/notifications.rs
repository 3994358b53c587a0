//! Event-log consumer that notifies customers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::DomainEvent;
use event_log::{EntryHandler, HandlerError, LogEntry};

use crate::services::NotificationDispatcher;
use crate::store::IdempotencyStore;

/// How long a sent notification is remembered.
pub const NOTIFICATION_KEY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Turns log entries back into [`DomainEvent`]s and dispatches them.
///
/// Delivery from the log is at-least-once, so each entry is guarded by a
/// `notification-sent:<topic>:<entryId>` key. The key is dropped again when
/// dispatch fails, letting the redelivery send it.
pub struct NotificationHandler {
    dispatcher: Arc<dyn NotificationDispatcher>,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl NotificationHandler {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        idempotency: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            dispatcher,
            idempotency,
        }
    }

    fn dedup_key(entry: &LogEntry) -> String {
        format!("notification-sent:{}:{}", entry.topic, entry.id)
    }
}

#[async_trait]
impl EntryHandler for NotificationHandler {
    #[tracing::instrument(skip(self, entry), fields(topic = %entry.topic, entry_id = %entry.id))]
    async fn handle(&self, entry: &LogEntry) -> Result<(), HandlerError> {
        let event = match DomainEvent::from_fields(&entry.fields) {
            Ok(event) => event,
            Err(e) => {
                // Acked as handled; redelivery cannot fix a bad entry.
                tracing::warn!(error = %e, "Skipping undecodable entry");
                metrics::counter!("notifications_skipped_total").increment(1);
                return Ok(());
            }
        };

        let key = Self::dedup_key(entry);
        let claimed = self
            .idempotency
            .try_claim(&key, NOTIFICATION_KEY_TTL)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;
        if !claimed {
            tracing::debug!("Notification already sent");
            return Ok(());
        }

        if let Err(e) = self.dispatcher.dispatch(&event).await {
            if let Err(release) = self.idempotency.release(&key).await {
                tracing::error!(error = %release, "Failed to release notification key");
            }
            metrics::counter!("notifications_failed_total", "type" => event.event_type())
                .increment(1);
            return Err(HandlerError::new(format!("dispatch failed: {e}")));
        }

        metrics::counter!("notifications_sent_total", "type" => event.event_type()).increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SagaError};
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use common::{OrderId, RequestId, UserId};
    use event_log::{EntryId, Fields, Topic};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<&'static str>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl NotificationDispatcher for Recording {
        async fn dispatch(&self, event: &DomainEvent) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SagaError::Dependency("smtp down".to_string()));
            }
            self.sent.lock().await.push(event.event_type());
            Ok(())
        }
    }

    fn entry(fields: Fields) -> LogEntry {
        LogEntry {
            id: EntryId::new(1),
            topic: Topic::Order,
            fields,
            appended_at: Utc::now(),
            deliveries: 1,
        }
    }

    fn order_created() -> LogEntry {
        let event = DomainEvent::OrderCreated {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            total_amount: "200.00".parse().unwrap(),
            request_id: RequestId::generate(),
        };
        entry(event.to_fields())
    }

    #[tokio::test]
    async fn redelivered_entry_is_sent_once() {
        let dispatcher = Arc::new(Recording::default());
        let handler = NotificationHandler::new(dispatcher.clone(), Arc::new(InMemoryStore::new()));
        let entry = order_created();

        handler.handle(&entry).await.unwrap();
        handler.handle(&entry).await.unwrap();

        assert_eq!(*dispatcher.sent.lock().await, vec!["ORDER_CREATED"]);
    }

    #[tokio::test]
    async fn failed_dispatch_can_be_retried() {
        let dispatcher = Arc::new(Recording::default());
        let handler = NotificationHandler::new(dispatcher.clone(), Arc::new(InMemoryStore::new()));
        let entry = order_created();

        dispatcher.fail.store(true, Ordering::SeqCst);
        assert!(handler.handle(&entry).await.is_err());

        dispatcher.fail.store(false, Ordering::SeqCst);
        handler.handle(&entry).await.unwrap();
        assert_eq!(dispatcher.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn undecodable_entry_is_acked_without_dispatch() {
        let dispatcher = Arc::new(Recording::default());
        let handler = NotificationHandler::new(dispatcher.clone(), Arc::new(InMemoryStore::new()));

        let mut fields = Fields::new();
        fields.insert("type".to_string(), "SOMETHING_ELSE".to_string());
        handler.handle(&entry(fields)).await.unwrap();

        assert!(dispatcher.sent.lock().await.is_empty());
    }
}
