use std::time::Duration;

use async_trait::async_trait;

use crate::{EntryId, Fields, LogEntry, PendingEntry, Result, Topic};

/// Options for a group read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// Maximum number of entries returned per topic.
    pub count: usize,
    /// How long to wait for new entries when none are ready.
    pub block: Duration,
    /// Pending entries idle at least this long are re-delivered.
    pub min_idle: Duration,
    /// Entries that would be delivered more often than this are moved to
    /// [`Topic::DeadLetter`] instead. `None` retries forever.
    pub max_deliveries: Option<u32>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            count: 10,
            block: Duration::from_secs(5),
            min_idle: Duration::from_secs(60),
            max_deliveries: Some(5),
        }
    }
}

impl ReadOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn min_idle(mut self, min_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn max_deliveries(mut self, max_deliveries: Option<u32>) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    /// Returns true when a pending entry already delivered `deliveries`
    /// times must not be handed out again.
    pub fn exhausted(&self, deliveries: u32) -> bool {
        self.max_deliveries.is_some_and(|max| deliveries >= max)
    }
}

/// Core trait for event log implementations.
///
/// Implementations must keep ids strictly increasing per topic and must hand
/// each pending entry to at most one group member at a time.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends an entry to a topic and returns its id.
    async fn append(&self, topic: Topic, fields: Fields) -> Result<EntryId>;

    /// Reads entries for `consumer` in `group` across `topics`.
    ///
    /// Pending entries idle for at least `min_idle` are re-claimed first,
    /// then new entries are delivered. The group is created on first use
    /// and starts at the beginning of each topic. When nothing is ready the
    /// call waits up to `block` before returning an empty batch.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        topics: &[Topic],
        options: &ReadOptions,
    ) -> Result<Vec<LogEntry>>;

    /// Acknowledges entries, removing them from the group's pending list.
    /// Returns how many were actually pending.
    async fn ack(&self, topic: Topic, group: &str, ids: &[EntryId]) -> Result<usize>;

    /// Lists entries delivered to the group but not yet acknowledged.
    async fn pending(&self, topic: Topic, group: &str) -> Result<Vec<PendingEntry>>;

    /// Returns every entry in a topic, oldest first.
    async fn range(&self, topic: Topic) -> Result<Vec<LogEntry>>;

    /// Number of entries in a topic.
    async fn len(&self, topic: Topic) -> Result<usize>;
}

pub(crate) fn validate_fields(fields: &Fields) -> Result<()> {
    if fields.is_empty() {
        return Err(crate::EventLogError::EmptyEntry);
    }
    Ok(())
}

pub(crate) fn record_append(topic: Topic) {
    metrics::counter!("event_log_appended_total", "topic" => topic.as_str()).increment(1);
}

pub(crate) fn record_dead_letter(topic: Topic, group: &str, id: EntryId, deliveries: u32) {
    tracing::warn!(
        topic = %topic,
        group = %group,
        entry_id = %id,
        deliveries,
        "Entry exhausted its deliveries, moved to dead letter"
    );
    metrics::counter!("event_log_dead_lettered_total", "topic" => topic.as_str()).increment(1);
}
