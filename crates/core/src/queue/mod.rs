//! Durable job queue with at-least-once delivery.
//!
//! Two logical queues (`analysis`, `assets`) share one table. A received
//! message stays leased until acked, nacked or its visibility timeout
//! lapses, at which point it is delivered again. Workers renew the lease
//! between stages so a long job is never visible twice.

mod sqlite;

pub use sqlite::SqliteJobQueue;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::ArtifactKind;
use crate::job::Pipeline;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed queue message {id}: {reason}")]
    Malformed { id: i64, reason: String },

    #[error("Queue message not found: {0}")]
    NotFound(i64),

    /// The lease ran out and the message was handed to another receiver.
    #[error("Lease on queue message {0} is no longer held")]
    LeaseLost(i64),
}

impl From<crate::db::DbError> for QueueError {
    fn from(e: crate::db::DbError) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Analysis,
    Assets,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Analysis, QueueName::Assets];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Analysis => "analysis",
            QueueName::Assets => "assets",
        }
    }

    /// Audiobook runs share the assets queue.
    pub fn for_pipeline(pipeline: Pipeline) -> Self {
        match pipeline {
            Pipeline::Analysis => QueueName::Analysis,
            Pipeline::Assets | Pipeline::Audiobook => QueueName::Assets,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(QueueName::Analysis),
            "assets" => Some(QueueName::Assets),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue payload. Idempotent by `report_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    /// Object key of the raw manuscript.
    pub manuscript_key: String,
    pub report_id: String,
    pub genre: String,
    #[serde(default)]
    pub style_guide: Option<String>,
    pub pipeline: Pipeline,
    /// Delivery number, filled in from the queue's counter on receipt.
    #[serde(default)]
    pub attempt: u32,
    pub manuscript_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<ArtifactKind>>,
}

/// A leased message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub queue: QueueName,
    /// Number of times this message has been received, this one included.
    pub attempts: u32,
    pub message: JobMessage,
}

/// A parked message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: i64,
    pub queue: QueueName,
    pub attempts: u32,
    pub reason: Option<String>,
    pub message: JobMessage,
    pub enqueued_at: DateTime<Utc>,
    pub dead_at: DateTime<Utc>,
}

pub trait JobQueue: Send + Sync {
    /// Persist a message; returns once it is durable.
    fn enqueue(&self, queue: QueueName, message: &JobMessage) -> Result<i64, QueueError>;

    /// Lease the oldest visible message, if any.
    fn receive(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError>;

    /// Push the lease on a message still being worked a full visibility
    /// timeout into the future. Fails with `LeaseLost` once another
    /// receiver holds it.
    fn extend_lease(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Hand back a message that was received but never started; it is
    /// visible at once and the receipt does not count as an attempt.
    fn release(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Done; remove the message.
    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Make the message visible again after `retry_after`.
    fn nack(&self, delivery: &Delivery, retry_after: Duration, error: &str)
        -> Result<(), QueueError>;

    /// Park the message; it is no longer delivered.
    fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    fn list_dead_letters(
        &self,
        queue: Option<QueueName>,
        limit: usize,
    ) -> Result<Vec<DeadLetter>, QueueError>;

    /// Remove a dead letter and return it, for replay.
    fn take_dead_letter(&self, id: i64) -> Result<Option<DeadLetter>, QueueError>;

    /// Messages waiting or leased.
    fn depth(&self, queue: QueueName) -> Result<usize, QueueError>;
}

/// Endless stream of deliveries from `queue`, polling every `poll_interval`
/// while the queue is empty. Receive errors are yielded, not fatal.
pub fn consume(
    queue: Arc<dyn JobQueue>,
    name: QueueName,
    poll_interval: Duration,
) -> impl Stream<Item = Result<Delivery, QueueError>> {
    stream::unfold(queue, move |queue| async move {
        loop {
            match queue.receive(name) {
                Ok(Some(delivery)) => return Some((Ok(delivery), queue)),
                Ok(None) => tokio::time::sleep(poll_interval).await,
                Err(e) => {
                    tokio::time::sleep(poll_interval).await;
                    return Some((Err(e), queue));
                }
            }
        }
    })
}
