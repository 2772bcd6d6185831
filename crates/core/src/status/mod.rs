//! Per-job status records.
//!
//! Stored as JSON under `status:{reportId}` in the key-value store. Every
//! write is a compare-and-swap on the previous value, so concurrent writers
//! for one job are strongly ordered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::job::Pipeline;
use crate::kv::{status_key, KvError, KvStore};

/// Attempts at the read-modify-write loop before giving up.
const MAX_CAS_ROUNDS: usize = 16;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("Status not found: {0}")]
    NotFound(String),

    #[error("Illegal job transition {from} -> {to}")]
    IllegalTransition { from: JobState, to: JobState },

    #[error("Status record for {0} kept changing under us")]
    Contended(String),

    #[error("Corrupt status record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    /// A stage finished; more remain.
    StageDone,
    Complete,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::StageDone => "stage_done",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is a legal move. Non-terminal states may repeat.
    pub fn can_move_to(&self, to: JobState) -> bool {
        use JobState::*;
        match self {
            Queued => matches!(to, Queued | Running | Cancelled | Failed),
            Running | StageDone => matches!(to, Running | StageDone | Complete | Failed | Cancelled),
            Complete | Failed | Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub report_id: String,
    pub state: JobState,
    pub current_stage: Option<String>,
    /// 0..=100, never decreases.
    pub progress: u8,
    pub message: Option<String>,
    #[serde(rename = "timestamp")]
    pub updated_at: DateTime<Utc>,
    pub attempt: u32,
    pub pipeline: Pipeline,
}

/// A requested change. Unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub state: Option<JobState>,
    pub current_stage: Option<String>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub attempt: Option<u32>,
}

impl StatusUpdate {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.current_stage = Some(stage.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Canonical job state machine over a [`KvStore`].
#[derive(Clone)]
pub struct StatusTracker {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl StatusTracker {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { kv, clock, ttl }
    }

    fn encode(status: &JobStatus) -> Result<String, StatusError> {
        serde_json::to_string(status).map_err(|e| StatusError::Corrupt(e.to_string()))
    }

    fn decode(raw: &str) -> Result<JobStatus, StatusError> {
        serde_json::from_str(raw).map_err(|e| StatusError::Corrupt(e.to_string()))
    }

    /// Create the `queued` record. Re-creating an existing record returns it
    /// unchanged, so enqueue stays idempotent by report id.
    pub fn create(&self, report_id: &str, pipeline: Pipeline) -> Result<JobStatus, StatusError> {
        let status = JobStatus {
            report_id: report_id.to_string(),
            state: JobState::Queued,
            current_stage: None,
            progress: 0,
            message: None,
            updated_at: self.clock.now(),
            attempt: 0,
            pipeline,
        };
        let key = status_key(report_id);
        if self
            .kv
            .compare_and_swap(&key, None, &Self::encode(&status)?, Some(self.ttl))?
        {
            return Ok(status);
        }
        self.get(report_id)?
            .ok_or_else(|| StatusError::NotFound(report_id.to_string()))
    }

    pub fn get(&self, report_id: &str) -> Result<Option<JobStatus>, StatusError> {
        self.kv
            .get(&status_key(report_id))?
            .map(|raw| Self::decode(&raw))
            .transpose()
    }

    /// Apply `update` atomically. Progress regressions are clamped to the
    /// current value; moves out of a terminal state are rejected.
    pub fn update(&self, report_id: &str, update: StatusUpdate) -> Result<JobStatus, StatusError> {
        self.modify(report_id, |current| {
            let to = update.state.unwrap_or(current.state);
            if !current.state.can_move_to(to) {
                return Err(StatusError::IllegalTransition {
                    from: current.state,
                    to,
                });
            }

            let mut next = current.clone();
            next.state = to;
            if let Some(stage) = &update.current_stage {
                next.current_stage = Some(stage.clone());
            }
            if let Some(progress) = update.progress {
                next.progress = progress.min(100).max(current.progress);
            }
            if let Some(message) = &update.message {
                next.message = Some(message.clone());
            }
            if let Some(attempt) = update.attempt {
                next.attempt = attempt;
            }
            if to == JobState::Complete {
                next.progress = 100;
            }
            Ok(Some(next))
        })
    }

    /// Cooperative cancel. A terminal job is returned untouched.
    pub fn cancel(&self, report_id: &str, message: Option<&str>) -> Result<JobStatus, StatusError> {
        self.modify(report_id, |current| {
            if current.state.is_terminal() {
                return Ok(None);
            }
            let mut next = current.clone();
            next.state = JobState::Cancelled;
            next.message = Some(message.unwrap_or("cancelled").to_string());
            Ok(Some(next))
        })
    }

    /// Whether the job has been cancelled (or the record is gone).
    pub fn is_cancelled(&self, report_id: &str) -> Result<bool, StatusError> {
        Ok(match self.get(report_id)? {
            Some(status) => status.state == JobState::Cancelled,
            None => false,
        })
    }

    fn modify(
        &self,
        report_id: &str,
        f: impl Fn(&JobStatus) -> Result<Option<JobStatus>, StatusError>,
    ) -> Result<JobStatus, StatusError> {
        let key = status_key(report_id);
        for _ in 0..MAX_CAS_ROUNDS {
            let raw = self
                .kv
                .get(&key)?
                .ok_or_else(|| StatusError::NotFound(report_id.to_string()))?;
            let current = Self::decode(&raw)?;

            let Some(mut next) = f(&current)? else {
                return Ok(current);
            };
            next.updated_at = self.clock.now();

            if self
                .kv
                .compare_and_swap(&key, Some(&raw), &Self::encode(&next)?, Some(self.ttl))?
            {
                if next.state != current.state {
                    tracing::debug!(
                        report_id,
                        from = %current.state,
                        to = %next.state,
                        progress = next.progress,
                        "Job state changed"
                    );
                }
                return Ok(next);
            }
        }
        Err(StatusError::Contended(report_id.to_string()))
    }
}
