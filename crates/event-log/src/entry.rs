use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EventLogError;

/// Flat key/value payload carried by a log entry.
pub type Fields = BTreeMap<String, String>;

/// A named, independently ordered stream of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    /// Order lifecycle events.
    Order,
    /// Payment outcome events.
    Payment,
    /// Holding topic for entries that exhausted their delivery attempts.
    DeadLetter,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Order => "ORDER",
            Topic::Payment => "PAYMENT",
            Topic::DeadLetter => "DEAD_LETTER",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Topic {
    type Err = EventLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER" => Ok(Topic::Order),
            "PAYMENT" => Ok(Topic::Payment),
            "DEAD_LETTER" => Ok(Topic::DeadLetter),
            other => Err(EventLogError::UnknownTopic(other.to_string())),
        }
    }
}

/// Server-assigned position of an entry within its topic.
///
/// Ids start at 1 and strictly increase per topic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntryId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// An immutable entry in a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntryId,
    pub topic: Topic,
    pub fields: Fields,
    pub appended_at: DateTime<Utc>,
    /// How many times this entry has been handed to the current group,
    /// including this delivery. Zero when read outside a group.
    #[serde(default)]
    pub deliveries: u32,
}

impl LogEntry {
    /// Returns a field value by key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Fields recorded when this entry is moved to the dead-letter topic.
    pub fn dead_letter_fields(&self, group: &str, deliveries: u32) -> Fields {
        let mut fields = self.fields.clone();
        fields.insert("sourceTopic".to_string(), self.topic.to_string());
        fields.insert("sourceId".to_string(), self.id.to_string());
        fields.insert("group".to_string(), group.to_string());
        fields.insert("deliveries".to_string(), deliveries.to_string());
        fields
    }
}

/// An entry delivered to a group member but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    pub deliveries: u32,
    pub last_delivered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trips_through_its_name() {
        for topic in [Topic::Order, Topic::Payment, Topic::DeadLetter] {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
        assert!(matches!(
            "SHIPPING".parse::<Topic>(),
            Err(EventLogError::UnknownTopic(_))
        ));
    }

    #[test]
    fn entry_id_ordering() {
        let first = EntryId::new(1);
        assert!(first < first.next());
        assert_eq!(first.next().as_u64(), 2);
    }

    #[test]
    fn dead_letter_fields_keep_original_payload() {
        let mut fields = Fields::new();
        fields.insert("type".to_string(), "ORDER_CREATED".to_string());
        let entry = LogEntry {
            id: EntryId::new(7),
            topic: Topic::Order,
            fields,
            appended_at: Utc::now(),
            deliveries: 5,
        };

        let dead = entry.dead_letter_fields("notifications", 5);
        assert_eq!(dead["type"], "ORDER_CREATED");
        assert_eq!(dead["sourceTopic"], "ORDER");
        assert_eq!(dead["sourceId"], "7");
        assert_eq!(dead["group"], "notifications");
        assert_eq!(dead["deliveries"], "5");
    }
}
