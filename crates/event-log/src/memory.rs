use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

use crate::{
    EntryId, Fields, LogEntry, PendingEntry, Result, Topic,
    log::{EventLog, ReadOptions, record_append, record_dead_letter, validate_fields},
};

#[derive(Debug, Clone)]
struct PendingState {
    consumer: String,
    deliveries: u32,
    last_delivered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingState>,
}

#[derive(Debug, Default)]
struct TopicState {
    entries: Vec<LogEntry>,
    groups: HashMap<String, GroupState>,
}

impl TopicState {
    fn push(&mut self, topic: Topic, fields: Fields) -> EntryId {
        let id = EntryId::new(self.entries.len() as u64 + 1);
        self.entries.push(LogEntry {
            id,
            topic,
            fields,
            appended_at: Utc::now(),
            deliveries: 0,
        });
        id
    }
}

fn entry_at(entries: &[LogEntry], id: EntryId) -> Option<&LogEntry> {
    let index = id.as_u64().checked_sub(1)?;
    entries.get(index as usize)
}

/// In-memory event log for tests and single-process deployments.
///
/// All state lives behind one lock, so every read and claim is atomic with
/// respect to other group members.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    topics: Arc<RwLock<HashMap<Topic, TopicState>>>,
    appended: Arc<Notify>,
}

impl InMemoryEventLog {
    /// Creates a new empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all topics and groups.
    pub async fn clear(&self) {
        self.topics.write().await.clear();
    }

    async fn claim(
        &self,
        group: &str,
        consumer: &str,
        topics: &[Topic],
        options: &ReadOptions,
    ) -> Vec<LogEntry> {
        let now = Utc::now();
        let mut state = self.topics.write().await;
        let mut delivered = Vec::new();
        let mut dead_letters = Vec::new();

        for &topic in topics {
            let topic_state = state.entry(topic).or_default();
            let TopicState { entries, groups } = topic_state;
            let group_state = groups.entry(group.to_string()).or_default();

            let idle: Vec<EntryId> = group_state
                .pending
                .iter()
                .filter(|(_, p)| {
                    (now - p.last_delivered_at).to_std().unwrap_or_default() >= options.min_idle
                })
                .map(|(id, _)| *id)
                .collect();

            let mut taken = 0;
            for id in idle {
                if taken >= options.count {
                    break;
                }
                let Some(pending) = group_state.pending.get_mut(&id) else {
                    continue;
                };
                let Some(entry) = entry_at(entries, id) else {
                    continue;
                };

                if options.exhausted(pending.deliveries) {
                    dead_letters.push((entry.clone(), pending.deliveries));
                    group_state.pending.remove(&id);
                    continue;
                }

                pending.consumer = consumer.to_string();
                pending.deliveries += 1;
                pending.last_delivered_at = now;

                let mut entry = entry.clone();
                entry.deliveries = pending.deliveries;
                delivered.push(entry);
                taken += 1;
            }

            let fresh: Vec<&LogEntry> = entries
                .iter()
                .filter(|e| e.id > group_state.last_delivered)
                .take(options.count - taken)
                .collect();
            for entry in fresh {
                group_state.pending.insert(
                    entry.id,
                    PendingState {
                        consumer: consumer.to_string(),
                        deliveries: 1,
                        last_delivered_at: now,
                    },
                );
                group_state.last_delivered = entry.id;

                let mut entry = entry.clone();
                entry.deliveries = 1;
                delivered.push(entry);
            }
        }

        if !dead_letters.is_empty() {
            let dead = state.entry(Topic::DeadLetter).or_default();
            for (entry, deliveries) in dead_letters {
                dead.push(
                    Topic::DeadLetter,
                    entry.dead_letter_fields(group, deliveries),
                );
                record_dead_letter(entry.topic, group, entry.id, deliveries);
            }
            self.appended.notify_waiters();
        }

        delivered
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, topic: Topic, fields: Fields) -> Result<EntryId> {
        validate_fields(&fields)?;

        let id = {
            let mut state = self.topics.write().await;
            state.entry(topic).or_default().push(topic, fields)
        };
        self.appended.notify_waiters();
        record_append(topic);
        Ok(id)
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        topics: &[Topic],
        options: &ReadOptions,
    ) -> Result<Vec<LogEntry>> {
        let deadline = Instant::now() + options.block;

        loop {
            // Register interest before checking so an append between the
            // check and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.claim(group, consumer, topics, options).await;
            if !entries.is_empty() || Instant::now() >= deadline {
                return Ok(entries);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // One last look for entries whose idle time elapsed while waiting.
                return Ok(self.claim(group, consumer, topics, options).await);
            }
        }
    }

    async fn ack(&self, topic: Topic, group: &str, ids: &[EntryId]) -> Result<usize> {
        let mut state = self.topics.write().await;
        let Some(group_state) = state
            .get_mut(&topic)
            .and_then(|t| t.groups.get_mut(group))
        else {
            return Ok(0);
        };

        Ok(ids
            .iter()
            .filter(|id| group_state.pending.remove(*id).is_some())
            .count())
    }

    async fn pending(&self, topic: Topic, group: &str) -> Result<Vec<PendingEntry>> {
        let state = self.topics.read().await;
        let pending = state
            .get(&topic)
            .and_then(|t| t.groups.get(group))
            .map(|g| {
                g.pending
                    .iter()
                    .map(|(id, p)| PendingEntry {
                        id: *id,
                        consumer: p.consumer.clone(),
                        deliveries: p.deliveries,
                        last_delivered_at: p.last_delivered_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(pending)
    }

    async fn range(&self, topic: Topic) -> Result<Vec<LogEntry>> {
        let state = self.topics.read().await;
        Ok(state
            .get(&topic)
            .map(|t| t.entries.clone())
            .unwrap_or_default())
    }

    async fn len(&self, topic: Topic) -> Result<usize> {
        let state = self.topics.read().await;
        Ok(state.get(&topic).map(|t| t.entries.len()).unwrap_or(0))
    }
}
