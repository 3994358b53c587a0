//! Consumer loop feeding log entries to a handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{EventLog, HandlerError, LogEntry, ReadOptions, Result, Topic};

/// Handles entries delivered by an [`EventConsumer`].
#[async_trait]
pub trait EntryHandler: Send + Sync {
    /// Processes one entry. Returning an error leaves the entry pending so
    /// it is re-delivered after the group's idle timeout.
    async fn handle(&self, entry: &LogEntry) -> std::result::Result<(), HandlerError>;
}

/// Identity and read settings of a consumer group member.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topics: Vec<Topic>,
    pub group: String,
    pub consumer: String,
    pub read: ReadOptions,
}

impl ConsumerConfig {
    pub fn new(group: impl Into<String>, consumer: impl Into<String>, topics: Vec<Topic>) -> Self {
        Self {
            topics,
            group: group.into(),
            consumer: consumer.into(),
            read: ReadOptions::default(),
        }
    }

    pub fn with_read_options(mut self, read: ReadOptions) -> Self {
        self.read = read;
        self
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub delivered: usize,
    pub acked: usize,
    pub failed: usize,
}

/// Reads entries for one group member and hands them to a handler.
///
/// Entries are processed one at a time in delivery order. Each success is
/// acknowledged on its own; a failure is logged and the entry stays pending.
pub struct EventConsumer<H: EntryHandler> {
    log: Arc<dyn EventLog>,
    handler: H,
    config: ConsumerConfig,
}

impl<H: EntryHandler> EventConsumer<H> {
    pub fn new(log: Arc<dyn EventLog>, handler: H, config: ConsumerConfig) -> Self {
        Self {
            log,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Performs a single bounded read and processes what it returned.
    #[tracing::instrument(skip(self), fields(group = %self.config.group, consumer = %self.config.consumer))]
    pub async fn poll_once(&self) -> Result<ConsumerStats> {
        let entries = self.read().await?;
        self.process(&entries).await
    }

    async fn read(&self) -> Result<Vec<LogEntry>> {
        self.log
            .read_group(
                &self.config.group,
                &self.config.consumer,
                &self.config.topics,
                &self.config.read,
            )
            .await
    }

    async fn process(&self, entries: &[LogEntry]) -> Result<ConsumerStats> {
        let mut stats = ConsumerStats {
            delivered: entries.len(),
            ..ConsumerStats::default()
        };

        for entry in entries {
            match self.handler.handle(entry).await {
                Ok(()) => {
                    self.log
                        .ack(entry.topic, &self.config.group, &[entry.id])
                        .await?;
                    stats.acked += 1;
                    metrics::counter!(
                        "consumer_entries_processed_total",
                        "topic" => entry.topic.as_str(),
                        "result" => "acked"
                    )
                    .increment(1);
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        topic = %entry.topic,
                        entry_id = %entry.id,
                        deliveries = entry.deliveries,
                        error = %e,
                        "Handler failed, entry left pending"
                    );
                    metrics::counter!(
                        "consumer_entries_processed_total",
                        "topic" => entry.topic.as_str(),
                        "result" => "failed"
                    )
                    .increment(1);
                }
            }
        }

        Ok(stats)
    }

    /// Polls until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Shutdown only interrupts the blocking read. A batch already handed
    /// to the handler is finished and acknowledged first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            "Event consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let read = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                read = self.read() => read,
            };

            let processed = match read {
                Ok(entries) => self.process(&entries).await,
                Err(e) => Err(e),
            };
            if let Err(e) = processed {
                tracing::error!(error = %e, "Event consumer poll failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        tracing::info!(group = %self.config.group, "Event consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Mutex;

    use super::*;
    use crate::{Fields, InMemoryEventLog};

    #[derive(Clone, Default)]
    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
        failures_left: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EntryHandler for Recording {
        async fn handle(&self, entry: &LogEntry) -> std::result::Result<(), HandlerError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(HandlerError::new("dispatcher unavailable"));
            }
            let kind = entry.field("type").unwrap_or_default().to_string();
            self.seen.lock().await.push(kind);
            Ok(())
        }
    }

    fn fields(kind: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("type".to_string(), kind.to_string());
        fields
    }

    fn config(read: ReadOptions) -> ConsumerConfig {
        ConsumerConfig::new("notifications", "worker-1", vec![Topic::Order, Topic::Payment])
            .with_read_options(read)
    }

    #[tokio::test]
    async fn poll_processes_in_order_and_acks() {
        let log = InMemoryEventLog::new();
        log.append(Topic::Order, fields("ORDER_CREATED")).await.unwrap();
        log.append(Topic::Payment, fields("PAYMENT_CAPTURED"))
            .await
            .unwrap();

        let handler = Recording::default();
        let consumer = EventConsumer::new(
            Arc::new(log.clone()),
            handler.clone(),
            config(ReadOptions::new().block(Duration::ZERO)),
        );

        let stats = consumer.poll_once().await.unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.acked, 2);
        assert_eq!(
            *handler.seen.lock().await,
            vec!["ORDER_CREATED", "PAYMENT_CAPTURED"]
        );
        assert!(log.pending(Topic::Order, "notifications").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_entry_stays_pending_and_is_retried() {
        let log = InMemoryEventLog::new();
        log.append(Topic::Order, fields("ORDER_CREATED")).await.unwrap();

        let handler = Recording::default();
        handler.failures_left.store(1, Ordering::SeqCst);
        let consumer = EventConsumer::new(
            Arc::new(log.clone()),
            handler.clone(),
            config(
                ReadOptions::new()
                    .block(Duration::ZERO)
                    .min_idle(Duration::ZERO),
            ),
        );

        let stats = consumer.poll_once().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(log.pending(Topic::Order, "notifications").await.unwrap().len(), 1);

        let stats = consumer.poll_once().await.unwrap();
        assert_eq!(stats.acked, 1);
        assert_eq!(*handler.seen.lock().await, vec!["ORDER_CREATED"]);
        assert!(log.pending(Topic::Order, "notifications").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let log = InMemoryEventLog::new();
        let handler = Recording::default();
        let consumer = Arc::new(EventConsumer::new(
            Arc::new(log.clone()),
            handler.clone(),
            config(ReadOptions::new().block(Duration::from_millis(50))),
        ));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move { consumer.run(rx).await }
        });

        log.append(Topic::Payment, fields("PAYMENT_FAILED"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*handler.seen.lock().await, vec!["PAYMENT_FAILED"]);
    }

    /// Takes a while to handle each entry.
    #[derive(Clone, Default)]
    struct Slow {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EntryHandler for Slow {
        async fn handle(&self, entry: &LogEntry) -> std::result::Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let kind = entry.field("type").unwrap_or_default().to_string();
            self.seen.lock().await.push(kind);
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_lets_the_running_handler_finish() {
        let log = InMemoryEventLog::new();
        let handler = Slow::default();
        let consumer = Arc::new(EventConsumer::new(
            Arc::new(log.clone()),
            handler.clone(),
            config(ReadOptions::new().block(Duration::from_millis(50))),
        ));

        log.append(Topic::Order, fields("ORDER_CREATED")).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move { consumer.run(rx).await }
        });

        // Signal while the handler is still sleeping.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*handler.seen.lock().await, vec!["ORDER_CREATED"]);
        assert!(log.pending(Topic::Order, "notifications").await.unwrap().is_empty());
    }
}
