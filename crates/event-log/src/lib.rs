//! Durable, ordered, append-only event log.
//!
//! Entries are appended to a [`Topic`] and receive a strictly increasing
//! [`EntryId`] within that topic. Consumers read through named groups: an
//! entry is handed to one group member at a time and stays pending until it
//! is acknowledged, so delivery is at-least-once.

pub mod consumer;
pub mod entry;
pub mod error;
pub mod log;
pub mod memory;
pub mod postgres;

pub use consumer::{ConsumerConfig, ConsumerStats, EntryHandler, EventConsumer};
pub use entry::{EntryId, Fields, LogEntry, PendingEntry, Topic};
pub use error::{EventLogError, HandlerError, Result};
pub use log::{EventLog, ReadOptions};
pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
