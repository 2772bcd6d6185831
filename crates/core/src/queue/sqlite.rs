use std::sync::Arc;
use std::time::Duration;

use rusqlite::Row;

use super::{DeadLetter, Delivery, JobMessage, JobQueue, QueueError, QueueName};
use crate::clock::Clock;
use crate::db::{get_ts, ts, Database, FromRow};

/// `queue_messages` table on the shared relational store.
pub struct SqliteJobQueue {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
}

impl SqliteJobQueue {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, visibility_timeout: Duration) -> Self {
        Self {
            db,
            clock,
            visibility_timeout,
        }
    }

    fn later(&self, by: Duration) -> String {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        ts(self
            .clock
            .now()
            .checked_add_signed(by)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC))
    }
}

struct RawMessage {
    id: i64,
    queue: String,
    body: String,
    attempts: u32,
}

impl FromRow for RawMessage {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawMessage {
            id: row.get(0)?,
            queue: row.get(1)?,
            body: row.get(2)?,
            attempts: row.get(3)?,
        })
    }
}

struct RawDeadLetter {
    raw: RawMessage,
    reason: Option<String>,
    enqueued_at: chrono::DateTime<chrono::Utc>,
    dead_at: chrono::DateTime<chrono::Utc>,
}

impl FromRow for RawDeadLetter {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawDeadLetter {
            raw: RawMessage::from_row(row)?,
            reason: row.get(4)?,
            enqueued_at: get_ts(row, 5)?,
            dead_at: get_ts(row, 6)?,
        })
    }
}

fn decode(raw: &RawMessage) -> Result<(QueueName, JobMessage), QueueError> {
    let queue = QueueName::parse(&raw.queue).ok_or_else(|| QueueError::Malformed {
        id: raw.id,
        reason: format!("unknown queue {}", raw.queue),
    })?;
    let message = serde_json::from_str(&raw.body).map_err(|e| QueueError::Malformed {
        id: raw.id,
        reason: e.to_string(),
    })?;
    Ok((queue, message))
}

impl RawDeadLetter {
    fn into_dead_letter(self) -> Result<DeadLetter, QueueError> {
        let (queue, message) = decode(&self.raw)?;
        Ok(DeadLetter {
            id: self.raw.id,
            queue,
            attempts: self.raw.attempts,
            reason: self.reason,
            message,
            enqueued_at: self.enqueued_at,
            dead_at: self.dead_at,
        })
    }
}

const DEAD_LETTER_COLUMNS: &str = "id, queue, body, attempts, last_error, enqueued_at, updated_at";

impl JobQueue for SqliteJobQueue {
    fn enqueue(&self, queue: QueueName, message: &JobMessage) -> Result<i64, QueueError> {
        let body = serde_json::to_string(message).map_err(|e| QueueError::Malformed {
            id: 0,
            reason: e.to_string(),
        })?;
        let now = ts(self.clock.now());
        let result = self
            .db
            .prepare(
                "INSERT INTO queue_messages (queue, report_id, body, state, attempts, visible_at, enqueued_at, updated_at) \
                 VALUES (?, ?, ?, 'ready', 0, ?, ?, ?)",
            )
            .bind(queue.as_str())
            .bind(message.report_id.as_str())
            .bind(body)
            .bind(now.clone())
            .bind(now.clone())
            .bind(now)
            .run()?;

        tracing::debug!(
            queue = %queue,
            report_id = %message.report_id,
            id = result.last_row_id,
            "Enqueued job"
        );
        Ok(result.last_row_id)
    }

    fn receive(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError> {
        let now = ts(self.clock.now());
        let lease_until = self.later(self.visibility_timeout);

        let leased: Option<RawMessage> = self.db.transaction(|tx| {
            let next: Option<RawMessage> = tx
                .prepare(
                    "SELECT id, queue, body, attempts FROM queue_messages \
                     WHERE queue = ? AND state = 'ready' AND visible_at <= ? \
                     ORDER BY id ASC LIMIT 1",
                )
                .bind(queue.as_str())
                .bind(now.clone())
                .first()?;

            let Some(mut raw) = next else {
                return Ok::<_, QueueError>(None);
            };

            raw.attempts += 1;
            tx.prepare(
                "UPDATE queue_messages SET attempts = ?, visible_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(raw.attempts)
            .bind(lease_until.clone())
            .bind(now.clone())
            .bind(raw.id)
            .run()?;
            Ok(Some(raw))
        })?;

        let Some(raw) = leased else {
            return Ok(None);
        };

        let (queue, mut message) = match decode(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                // A body we cannot read will never succeed; park it.
                self.db
                    .prepare(
                        "UPDATE queue_messages SET state = 'dead', last_error = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(e.to_string())
                    .bind(now)
                    .bind(raw.id)
                    .run()?;
                tracing::error!(id = raw.id, error = %e, "Dead-lettered unreadable message");
                return Err(e);
            }
        };
        message.attempt = raw.attempts;

        Ok(Some(Delivery {
            id: raw.id,
            queue,
            attempts: raw.attempts,
            message,
        }))
    }

    fn extend_lease(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = self
            .db
            .prepare(
                "UPDATE queue_messages SET visible_at = ?, updated_at = ? \
                 WHERE id = ? AND state = 'ready' AND attempts = ?",
            )
            .bind(self.later(self.visibility_timeout))
            .bind(ts(self.clock.now()))
            .bind(delivery.id)
            .bind(delivery.attempts)
            .run()?;
        if result.changes == 0 {
            return Err(QueueError::LeaseLost(delivery.id));
        }
        Ok(())
    }

    fn release(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let now = ts(self.clock.now());
        let result = self
            .db
            .prepare(
                "UPDATE queue_messages SET visible_at = ?, attempts = MAX(attempts - 1, 0), updated_at = ? \
                 WHERE id = ? AND state = 'ready' AND attempts = ?",
            )
            .bind(now.clone())
            .bind(now)
            .bind(delivery.id)
            .bind(delivery.attempts)
            .run()?;
        if result.changes == 0 {
            return Err(QueueError::LeaseLost(delivery.id));
        }
        tracing::debug!(
            queue = %delivery.queue,
            report_id = %delivery.message.report_id,
            "Released unstarted delivery"
        );
        Ok(())
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.db
            .prepare("DELETE FROM queue_messages WHERE id = ?")
            .bind(delivery.id)
            .run()?;
        Ok(())
    }

    fn nack(
        &self,
        delivery: &Delivery,
        retry_after: Duration,
        error: &str,
    ) -> Result<(), QueueError> {
        let result = self
            .db
            .prepare(
                "UPDATE queue_messages SET visible_at = ?, last_error = ?, updated_at = ? \
                 WHERE id = ? AND state = 'ready'",
            )
            .bind(self.later(retry_after))
            .bind(error)
            .bind(ts(self.clock.now()))
            .bind(delivery.id)
            .run()?;
        if result.changes == 0 {
            return Err(QueueError::NotFound(delivery.id));
        }
        Ok(())
    }

    fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let result = self
            .db
            .prepare(
                "UPDATE queue_messages SET state = 'dead', last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(reason)
            .bind(ts(self.clock.now()))
            .bind(delivery.id)
            .run()?;
        if result.changes == 0 {
            return Err(QueueError::NotFound(delivery.id));
        }
        tracing::warn!(
            queue = %delivery.queue,
            report_id = %delivery.message.report_id,
            attempts = delivery.attempts,
            reason,
            "Dead-lettered job"
        );
        Ok(())
    }

    fn list_dead_letters(
        &self,
        queue: Option<QueueName>,
        limit: usize,
    ) -> Result<Vec<DeadLetter>, QueueError> {
        let rows: Vec<RawDeadLetter> = match queue {
            Some(queue) => self
                .db
                .prepare(format!(
                    "SELECT {DEAD_LETTER_COLUMNS} FROM queue_messages \
                     WHERE state = 'dead' AND queue = ? ORDER BY id ASC LIMIT ?"
                ))
                .bind(queue.as_str())
                .bind(limit as i64)
                .all()?,
            None => self
                .db
                .prepare(format!(
                    "SELECT {DEAD_LETTER_COLUMNS} FROM queue_messages \
                     WHERE state = 'dead' ORDER BY id ASC LIMIT ?"
                ))
                .bind(limit as i64)
                .all()?,
        };
        rows.into_iter().map(RawDeadLetter::into_dead_letter).collect()
    }

    fn take_dead_letter(&self, id: i64) -> Result<Option<DeadLetter>, QueueError> {
        let row: Option<RawDeadLetter> = self.db.transaction(|tx| {
            let row: Option<RawDeadLetter> = tx
                .prepare(format!(
                    "SELECT {DEAD_LETTER_COLUMNS} FROM queue_messages WHERE id = ? AND state = 'dead'"
                ))
                .bind(id)
                .first()?;
            if row.is_some() {
                tx.prepare("DELETE FROM queue_messages WHERE id = ?")
                    .bind(id)
                    .run()?;
            }
            Ok::<_, QueueError>(row)
        })?;
        row.map(RawDeadLetter::into_dead_letter).transpose()
    }

    fn depth(&self, queue: QueueName) -> Result<usize, QueueError> {
        let count: Option<i64> = self
            .db
            .prepare("SELECT COUNT(*) FROM queue_messages WHERE queue = ? AND state = 'ready'")
            .bind(queue.as_str())
            .scalar()?;
        Ok(count.unwrap_or(0) as usize)
    }
}
