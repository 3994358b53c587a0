use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow, types::Json};
use tokio::time::Instant;

use crate::{
    EntryId, Fields, LogEntry, PendingEntry, Result, Topic,
    log::{EventLog, ReadOptions, record_append, record_dead_letter, validate_fields},
};

/// How often a blocked read re-checks the tables.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// PostgreSQL-backed event log.
///
/// Appends take a row lock on the topic's counter, so ids are assigned and
/// committed in order. Group reads lock the group row `FOR UPDATE`, which
/// serialises claims between competing consumers.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_entry(topic: Topic, row: PgRow) -> Result<LogEntry> {
        let Json(fields): Json<Fields> = row.try_get("fields")?;
        Ok(LogEntry {
            id: EntryId::new(row.try_get::<i64, _>("id")? as u64),
            topic,
            fields,
            appended_at: row.try_get("appended_at")?,
            deliveries: 0,
        })
    }

    async fn append_in(conn: &mut PgConnection, topic: Topic, fields: &Fields) -> Result<EntryId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO event_log_topics (topic, last_id)
            VALUES ($1, 1)
            ON CONFLICT (topic) DO UPDATE SET last_id = event_log_topics.last_id + 1
            RETURNING last_id
            "#,
        )
        .bind(topic.as_str())
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("INSERT INTO event_log (topic, id, fields) VALUES ($1, $2, $3)")
            .bind(topic.as_str())
            .bind(id)
            .bind(Json(fields))
            .execute(&mut *conn)
            .await?;

        Ok(EntryId::new(id as u64))
    }

    async fn fetch_entry(conn: &mut PgConnection, topic: Topic, id: i64) -> Result<LogEntry> {
        let row = sqlx::query(
            "SELECT id, fields, appended_at FROM event_log WHERE topic = $1 AND id = $2",
        )
        .bind(topic.as_str())
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        Self::row_to_entry(topic, row)
    }

    async fn claim_topic(
        &self,
        topic: Topic,
        group: &str,
        consumer: &str,
        options: &ReadOptions,
    ) -> Result<Vec<LogEntry>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO event_log_groups (topic, group_name, last_delivered_id)
            VALUES ($1, $2, 0)
            ON CONFLICT (topic, group_name) DO NOTHING
            "#,
        )
        .bind(topic.as_str())
        .bind(group)
        .execute(&mut *tx)
        .await?;

        let last_delivered: i64 = sqlx::query_scalar(
            r#"
            SELECT last_delivered_id FROM event_log_groups
            WHERE topic = $1 AND group_name = $2
            FOR UPDATE
            "#,
        )
        .bind(topic.as_str())
        .bind(group)
        .fetch_one(&mut *tx)
        .await?;

        let limit = options.count as i64;
        let idle = sqlx::query(
            r#"
            SELECT entry_id, deliveries FROM event_log_pending
            WHERE topic = $1 AND group_name = $2
              AND last_delivered_at <= now() - make_interval(secs => $3)
            ORDER BY entry_id
            LIMIT $4
            "#,
        )
        .bind(topic.as_str())
        .bind(group)
        .bind(options.min_idle.as_secs_f64())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut delivered = Vec::new();
        for row in idle {
            let id: i64 = row.try_get("entry_id")?;
            let deliveries = row.try_get::<i32, _>("deliveries")? as u32;
            let entry = Self::fetch_entry(&mut tx, topic, id).await?;

            if options.exhausted(deliveries) {
                Self::append_in(
                    &mut tx,
                    Topic::DeadLetter,
                    &entry.dead_letter_fields(group, deliveries),
                )
                .await?;
                sqlx::query(
                    "DELETE FROM event_log_pending WHERE topic = $1 AND group_name = $2 AND entry_id = $3",
                )
                .bind(topic.as_str())
                .bind(group)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                record_dead_letter(topic, group, entry.id, deliveries);
                continue;
            }

            sqlx::query(
                r#"
                UPDATE event_log_pending
                SET consumer = $4, deliveries = deliveries + 1, last_delivered_at = now()
                WHERE topic = $1 AND group_name = $2 AND entry_id = $3
                "#,
            )
            .bind(topic.as_str())
            .bind(group)
            .bind(id)
            .bind(consumer)
            .execute(&mut *tx)
            .await?;

            let mut entry = entry;
            entry.deliveries = deliveries + 1;
            delivered.push(entry);
        }

        let remaining = limit - delivered.len() as i64;
        if remaining > 0 {
            let rows = sqlx::query(
                r#"
                SELECT id, fields, appended_at FROM event_log
                WHERE topic = $1 AND id > $2
                ORDER BY id
                LIMIT $3
                "#,
            )
            .bind(topic.as_str())
            .bind(last_delivered)
            .bind(remaining)
            .fetch_all(&mut *tx)
            .await?;

            let mut newest = last_delivered;
            for row in rows {
                let mut entry = Self::row_to_entry(topic, row)?;
                let id = entry.id.as_u64() as i64;
                sqlx::query(
                    r#"
                    INSERT INTO event_log_pending
                        (topic, group_name, entry_id, consumer, deliveries, last_delivered_at)
                    VALUES ($1, $2, $3, $4, 1, now())
                    "#,
                )
                .bind(topic.as_str())
                .bind(group)
                .bind(id)
                .bind(consumer)
                .execute(&mut *tx)
                .await?;

                newest = id;
                entry.deliveries = 1;
                delivered.push(entry);
            }

            if newest != last_delivered {
                sqlx::query(
                    "UPDATE event_log_groups SET last_delivered_id = $3 WHERE topic = $1 AND group_name = $2",
                )
                .bind(topic.as_str())
                .bind(group)
                .bind(newest)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(delivered)
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    async fn append(&self, topic: Topic, fields: Fields) -> Result<EntryId> {
        validate_fields(&fields)?;

        let mut tx = self.pool.begin().await?;
        let id = Self::append_in(&mut tx, topic, &fields).await?;
        tx.commit().await?;

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
            let mut entries = Vec::new();
            for &topic in topics {
                entries.extend(self.claim_topic(topic, group, consumer, options).await?);
            }

            let now = Instant::now();
            if !entries.is_empty() || now >= deadline {
                return Ok(entries);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, topic: Topic, group: &str, ids: &[EntryId]) -> Result<usize> {
        let ids: Vec<i64> = ids.iter().map(|id| id.as_u64() as i64).collect();
        let result = sqlx::query(
            "DELETE FROM event_log_pending WHERE topic = $1 AND group_name = $2 AND entry_id = ANY($3)",
        )
        .bind(topic.as_str())
        .bind(group)
        .bind(&ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn pending(&self, topic: Topic, group: &str) -> Result<Vec<PendingEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, consumer, deliveries, last_delivered_at FROM event_log_pending
            WHERE topic = $1 AND group_name = $2
            ORDER BY entry_id
            "#,
        )
        .bind(topic.as_str())
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PendingEntry {
                    id: EntryId::new(row.try_get::<i64, _>("entry_id")? as u64),
                    consumer: row.try_get("consumer")?,
                    deliveries: row.try_get::<i32, _>("deliveries")? as u32,
                    last_delivered_at: row.try_get::<DateTime<Utc>, _>("last_delivered_at")?,
                })
            })
            .collect()
    }

    async fn range(&self, topic: Topic) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT id, fields, appended_at FROM event_log WHERE topic = $1 ORDER BY id",
        )
        .bind(topic.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Self::row_to_entry(topic, row))
            .collect()
    }

    async fn len(&self, topic: Topic) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_log WHERE topic = $1")
            .bind(topic.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
