//! Notification dispatch.

use async_trait::async_trait;
use domain::DomainEvent;

use crate::error::Result;

/// Sends customer notifications (email, push) for saga events.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &DomainEvent) -> Result<()>;
}

/// Dispatcher that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn dispatch(&self, event: &DomainEvent) -> Result<()> {
        tracing::info!(
            event_type = event.event_type(),
            order_id = %event.order_id(),
            user_id = %event.user_id(),
            request_id = %event.request_id(),
            "Notification sent"
        );
        Ok(())
    }
}
