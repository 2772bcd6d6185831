//! Types for the pipeline orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::StageFailure;

/// Errors that abort one delivery. All of them send the job back through
/// the queue's retry loop.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Stage(#[from] StageFailure),

    #[error("status store error: {0}")]
    Status(#[from] crate::status::StatusError),

    #[error("job store error: {0}")]
    Job(#[from] crate::job::JobError),

    #[error("manuscript store error: {0}")]
    Manuscript(#[from] crate::manuscript::ManuscriptError),

    #[error("artifact store error: {0}")]
    Artifact(#[from] crate::artifacts::ArtifactError),

    #[error("usage ledger error: {0}")]
    Usage(#[from] crate::usage::UsageError),

    #[error("object store unavailable: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("database error: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("manuscript could not be decoded: {0}")]
    Decode(String),
}

/// What happened to one delivery, and therefore what the queue does with it.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Every planned stage is published; usage recorded. Ack.
    Completed { total_cost_usd: f64 },
    /// Stopped cooperatively. Ack.
    Cancelled,
    /// Nothing to do (terminal status, unknown job, deleted manuscript). Ack.
    Skipped { reason: String },
    /// Failed attempt with attempts left. Nack.
    Retrying { attempt: u32, error: String },
    /// Attempts exhausted; job failed. Dead-letter.
    DeadLettered { error: String },
    /// The lease lapsed and another worker owns the delivery. Left alone.
    Superseded,
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed { .. } => "complete",
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::Skipped { .. } => "skipped",
            JobOutcome::Retrying { .. } => "retrying",
            JobOutcome::DeadLettered { .. } => "failed",
            JobOutcome::Superseded => "superseded",
        }
    }
}

/// Current status of the worker pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub running: bool,
    pub worker_count: usize,
    pub analysis_depth: usize,
    pub assets_depth: usize,
    pub dead_letters: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::StageError;
    use crate::artifacts::ArtifactKind;

    #[test]
    fn test_stage_error_display_names_stage() {
        let err = OrchestratorError::from(StageFailure {
            kind: ArtifactKind::CopyEditing,
            error: StageError::BadModelOutput("model output was not valid JSON".into()),
        });
        assert_eq!(
            err.to_string(),
            "copy-editing stage failed: model output was not valid JSON"
        );
    }

    #[test]
    fn test_orchestrator_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.analysis_depth, 0);
    }
}
