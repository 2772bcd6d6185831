//! User-facing operations over the pipeline.
//!
//! Every call is scoped to the calling user: a manuscript or job owned by
//! someone else is reported as not found. The HTTP layer translates
//! [`ServiceError`] to status codes and does nothing else.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::artifacts::{
    ArtifactBody, ArtifactError, ArtifactKind, ArtifactSummary, UnknownKind, EDITORIAL_KINDS,
};
use crate::audit::AuditEvent;
use crate::context::PipelineContext;
use crate::dispatch::{DispatchError, Dispatcher, Submission};
use crate::ingest::{IngestError, Ingestor, UploadReceipt, UploadRequest};
use crate::job::{Job, JobError, Pipeline};
use crate::manuscript::{Cursor, InvalidCursor, Manuscript, ManuscriptError, ManuscriptPage, ManuscriptState};
use crate::queue::{DeadLetter, QueueError, QueueName};
use crate::status::{JobState, JobStatus, StatusError};
use crate::storage::StorageError;
use crate::usage::{Quota, UsageError};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
const DEAD_LETTER_SCAN: usize = 10_000;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadFile(String),

    #[error("Quota exceeded: {used}/{limit} analyses used on the {plan_type} plan")]
    QuotaExceeded {
        plan_type: String,
        used: u32,
        limit: u32,
    },

    #[error("Authentication required")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition missing: {0}")]
    PreconditionMissing(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<IngestError> for ServiceError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::BadFile(msg) => ServiceError::BadFile(msg),
            IngestError::QuotaExceeded {
                plan_type,
                used,
                limit,
            } => ServiceError::QuotaExceeded {
                plan_type,
                used,
                limit,
            },
            IngestError::Dispatch(e) => e.into(),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Job(e) => e.into(),
            DispatchError::Manuscript(e) => e.into(),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<JobError> for ServiceError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::ActiveJobExists(id) => {
                ServiceError::Conflict(format!("manuscript {id} already has an active job"))
            }
            JobError::NotFound(id) => ServiceError::NotFound(format!("job {id}")),
            JobError::Database(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<ManuscriptError> for ServiceError {
    fn from(e: ManuscriptError) -> Self {
        match e {
            ManuscriptError::NotFound(id) => ServiceError::NotFound(format!("manuscript {id}")),
            ManuscriptError::IllegalTransition(t) => ServiceError::Conflict(t.to_string()),
            ManuscriptError::Conflict(id) => {
                ServiceError::Conflict(format!("manuscript {id} changed concurrently"))
            }
            ManuscriptError::Database(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<ArtifactError> for ServiceError {
    fn from(e: ArtifactError) -> Self {
        match e {
            ArtifactError::InvalidBody(msg) => ServiceError::InvalidRequest(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<StatusError> for ServiceError {
    fn from(e: StatusError) -> Self {
        match e {
            StatusError::NotFound(id) => ServiceError::NotFound(format!("status for job {id}")),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ServiceError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(id) => ServiceError::NotFound(format!("dead letter {id}")),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<UsageError> for ServiceError {
    fn from(e: UsageError) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

impl From<UnknownKind> for ServiceError {
    fn from(e: UnknownKind) -> Self {
        ServiceError::InvalidRequest(e.to_string())
    }
}

impl From<InvalidCursor> for ServiceError {
    fn from(_: InvalidCursor) -> Self {
        ServiceError::InvalidRequest("invalid cursor".to_string())
    }
}

/// Per-manuscript analysis summary, cached for an hour. The job status
/// inside is refreshed on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStatus {
    pub manuscript_id: String,
    pub state: ManuscriptState,
    pub latest_report_id: Option<String>,
    pub job: Option<JobStatus>,
    /// Editorial stages with a published artifact.
    pub completed_stages: Vec<ArtifactKind>,
    pub pending_stages: Vec<ArtifactKind>,
    /// Every kind produced so far, editorial or not.
    pub artifact_count: usize,
    pub total_cost_usd: f64,
}

impl AnalysisStatus {
    pub fn is_complete(&self) -> bool {
        self.pending_stages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReceipt {
    pub manuscript_id: String,
    pub report_id: String,
    pub pipeline: Pipeline,
    pub status: JobState,
    /// True when an existing non-terminal job was returned instead of a new one.
    #[serde(default)]
    pub existing: bool,
}

impl JobReceipt {
    fn new(job: &Job) -> Self {
        Self {
            manuscript_id: job.manuscript_id.clone(),
            report_id: job.report_id.clone(),
            pipeline: job.pipeline,
            status: JobState::Queued,
            existing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanEditReceipt {
    pub kind: ArtifactKind,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReceipt {
    pub manuscript_id: String,
    pub artifacts_removed: usize,
    /// Job cancelled because it was still running.
    pub cancelled_report_id: Option<String>,
}

/// Choose the pipeline for a regeneration of `kinds` (all assets if `None`).
pub fn regeneration_pipeline(kinds: Option<&[ArtifactKind]>) -> Result<Pipeline, ServiceError> {
    let Some(kinds) = kinds.filter(|k| !k.is_empty()) else {
        return Ok(Pipeline::Assets);
    };
    if let Some(edit) = kinds.iter().find(|k| !k.is_generated()) {
        return Err(ServiceError::InvalidRequest(format!(
            "{edit} is author-supplied and cannot be regenerated"
        )));
    }
    let editorial = kinds.iter().filter(|k| k.is_editorial()).count();
    if editorial == kinds.len() {
        return Ok(Pipeline::Analysis);
    }
    if editorial > 0 {
        return Err(ServiceError::InvalidRequest(
            "editorial and asset kinds must be regenerated separately".to_string(),
        ));
    }
    if kinds.iter().all(ArtifactKind::is_audiobook) {
        Ok(Pipeline::Audiobook)
    } else {
        Ok(Pipeline::Assets)
    }
}

pub struct PipelineService {
    ctx: Arc<PipelineContext>,
    ingestor: Ingestor,
    dispatcher: Dispatcher,
}

impl PipelineService {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ingestor: Ingestor::new(ctx.clone()),
            dispatcher: Dispatcher::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub async fn upload(&self, req: UploadRequest) -> Result<UploadReceipt, ServiceError> {
        require_user(&req.user_id)?;
        Ok(self.ingestor.upload(req).await?)
    }

    pub async fn get_manuscript(&self, user_id: &str, id: &str) -> Result<Manuscript, ServiceError> {
        require_user(user_id)?;
        self.ctx
            .artifacts
            .cache()
            .manuscript(user_id, id, self.load_manuscript(user_id, id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("manuscript {id}")))
    }

    async fn load_manuscript(&self, user_id: &str, id: &str) -> Result<Option<Manuscript>, ServiceError> {
        Ok(self.ctx.manuscripts.get_owned(user_id, id)?)
    }

    /// Newest first. Only first pages are cached.
    pub async fn list_manuscripts(
        &self,
        user_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ManuscriptPage, ServiceError> {
        require_user(user_id)?;
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        match cursor.filter(|c| !c.is_empty()) {
            Some(raw) => {
                let cursor = Cursor::decode(raw)?;
                Ok(self.ctx.manuscripts.list(user_id, Some(&cursor), limit)?)
            }
            None => {
                let page = self
                    .ctx
                    .artifacts
                    .cache()
                    .first_page(user_id, limit, self.load_first_page(user_id, limit))
                    .await?;
                Ok(page.unwrap_or(ManuscriptPage {
                    items: Vec::new(),
                    next_cursor: None,
                }))
            }
        }
    }

    async fn load_first_page(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Option<ManuscriptPage>, ServiceError> {
        Ok(Some(self.ctx.manuscripts.list(user_id, None, limit)?))
    }

    /// Status of one job owned by `user_id`.
    pub async fn get_status(&self, user_id: &str, report_id: &str) -> Result<JobStatus, ServiceError> {
        let job = self.owned_job(user_id, report_id)?;
        self.ctx
            .status
            .get(&job.report_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("status for job {report_id}")))
    }

    pub async fn analysis_status(&self, user_id: &str, id: &str) -> Result<AnalysisStatus, ServiceError> {
        require_user(user_id)?;
        let mut summary = self
            .ctx
            .artifacts
            .cache()
            .analysis_status(user_id, id, self.load_analysis_status(user_id, id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("manuscript {id}")))?;

        if let Some(report_id) = &summary.latest_report_id {
            summary.job = self.ctx.status.get(report_id)?;
        }
        Ok(summary)
    }

    async fn load_analysis_status(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<AnalysisStatus>, ServiceError> {
        let Some(manuscript) = self.ctx.manuscripts.get_owned(user_id, id)? else {
            return Ok(None);
        };
        let records = self.ctx.artifacts.index().list(id)?;
        let produced = |kind: &ArtifactKind| records.iter().any(|r| &r.kind == kind);
        let (completed_stages, pending_stages): (Vec<_>, Vec<_>) = EDITORIAL_KINDS
            .iter()
            .cloned()
            .partition(|k| produced(k));

        Ok(Some(AnalysisStatus {
            manuscript_id: manuscript.id,
            state: manuscript.state,
            latest_report_id: manuscript.latest_report_id,
            job: None,
            completed_stages,
            pending_stages,
            artifact_count: records.len(),
            total_cost_usd: records.iter().map(|r| r.cost_usd).sum(),
        }))
    }

    pub async fn list_artifacts(
        &self,
        user_id: &str,
        manuscript_id: &str,
    ) -> Result<Vec<ArtifactSummary>, ServiceError> {
        self.get_manuscript(user_id, manuscript_id).await?;
        let kinds = self.ctx.artifacts.list_kinds(user_id, manuscript_id).await?;
        Ok(kinds.into_values().collect())
    }

    /// Body of the latest version of `kind`; `NotFound` if it was never produced.
    pub async fn fetch_artifact(
        &self,
        user_id: &str,
        manuscript_id: &str,
        kind: &str,
    ) -> Result<Arc<ArtifactBody>, ServiceError> {
        let kind: ArtifactKind = kind.parse()?;
        self.get_manuscript(user_id, manuscript_id).await?;
        self.ctx
            .artifacts
            .get_artifact(user_id, manuscript_id, &kind)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("{kind} artifact for {manuscript_id}")))
    }

    /// Manual (re)start of the analysis pipeline. Returns the running job
    /// when there is one.
    pub async fn start_analysis(&self, user_id: &str, manuscript_id: &str) -> Result<JobReceipt, ServiceError> {
        let manuscript = self.owned_manuscript(user_id, manuscript_id)?;

        if let Some(active) = self.ctx.jobs.active_for_manuscript(manuscript_id)? {
            let status = self.ctx.status.get(&active.report_id)?;
            match status {
                Some(status) if !status.state.is_terminal() => {
                    return Ok(JobReceipt {
                        status: status.state,
                        existing: true,
                        ..JobReceipt::new(&active)
                    });
                }
                // Finished but never settled by a worker.
                _ => self.ctx.jobs.finish(&active.report_id)?,
            }
        }

        self.check_quota(user_id).await?;
        let job = self
            .dispatcher
            .submit(Submission::new(&manuscript, Pipeline::Analysis))
            .await?;
        info!(report_id = %job.report_id, manuscript_id, "Analysis started");
        Ok(JobReceipt::new(&job))
    }

    /// Re-run `kinds` (every asset kind if `None`). Requires the
    /// developmental edit.
    pub async fn request_regeneration(
        &self,
        user_id: &str,
        manuscript_id: &str,
        kinds: Option<Vec<ArtifactKind>>,
    ) -> Result<JobReceipt, ServiceError> {
        let manuscript = self.owned_manuscript(user_id, manuscript_id)?;
        let pipeline = regeneration_pipeline(kinds.as_deref())?;

        if self
            .ctx
            .artifacts
            .index()
            .get(manuscript_id, &ArtifactKind::Developmental)?
            .is_none()
        {
            return Err(ServiceError::PreconditionMissing(
                "the developmental edit must exist before regenerating".to_string(),
            ));
        }
        self.check_quota(user_id).await?;

        let mut submission = Submission::new(&manuscript, pipeline);
        let kinds = kinds.filter(|k| !k.is_empty());
        if let Some(kinds) = &kinds {
            submission = submission.with_kinds(kinds.clone());
        }
        let job = self.dispatcher.submit(submission).await?;

        self.ctx
            .audit
            .emit(AuditEvent::RegenerationRequested {
                user_id: user_id.to_string(),
                manuscript_id: manuscript_id.to_string(),
                report_id: job.report_id.clone(),
                pipeline: pipeline.to_string(),
                kinds: kinds
                    .unwrap_or_default()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .await;
        Ok(JobReceipt::new(&job))
    }

    /// Cooperative cancel. Cancelling a finished job returns it unchanged.
    pub async fn cancel_job(&self, user_id: &str, report_id: &str) -> Result<JobStatus, ServiceError> {
        let job = self.owned_job(user_id, report_id)?;
        let before = self
            .ctx
            .status
            .get(report_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("status for job {report_id}")))?;
        let after = self.ctx.status.cancel(report_id, Some("cancelled by user"))?;

        if !before.state.is_terminal() && after.state == JobState::Cancelled {
            self.ctx
                .audit
                .emit(AuditEvent::JobCancelled {
                    user_id: user_id.to_string(),
                    report_id: report_id.to_string(),
                    previous_state: before.state.to_string(),
                })
                .await;
            self.ctx
                .artifacts
                .cache()
                .invalidate_status(user_id, &job.manuscript_id)
                .await;
            info!(report_id, previous = %before.state, "Job cancelled by user");
        }
        Ok(after)
    }

    /// Remove the manuscript, its blobs and index rows. A running job is
    /// cancelled first; its status record expires on its own.
    pub async fn delete_manuscript(&self, user_id: &str, id: &str) -> Result<DeletionReceipt, ServiceError> {
        let manuscript = self.owned_manuscript(user_id, id)?;

        let mut cancelled_report_id = None;
        if let Some(active) = self.ctx.jobs.active_for_manuscript(id)? {
            let status = self.ctx.status.cancel(&active.report_id, Some("manuscript deleted"));
            match status {
                Ok(s) if s.state == JobState::Cancelled => {
                    cancelled_report_id = Some(active.report_id.clone())
                }
                Ok(_) => {}
                Err(e) => warn!(report_id = %active.report_id, error = %e, "Failed to cancel job of deleted manuscript"),
            }
        }

        let artifacts_removed = self.ctx.artifacts.delete_for_manuscript(user_id, id).await?;
        self.ctx.objects.delete(&manuscript.storage_key).await?;
        self.ctx.manuscripts.delete(id)?;
        self.ctx.artifacts.cache().invalidate_manuscript(user_id, id).await;

        self.ctx
            .audit
            .emit(AuditEvent::ManuscriptDeleted {
                user_id: user_id.to_string(),
                manuscript_id: id.to_string(),
                artifacts_removed,
            })
            .await;
        info!(manuscript_id = id, artifacts_removed, "Manuscript deleted");

        Ok(DeletionReceipt {
            manuscript_id: id.to_string(),
            artifacts_removed,
            cancelled_report_id,
        })
    }

    pub async fn put_human_edit(
        &self,
        user_id: &str,
        manuscript_id: &str,
        chapter: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<HumanEditReceipt, ServiceError> {
        let manuscript = self.owned_manuscript(user_id, manuscript_id)?;
        if body.is_empty() {
            return Err(ServiceError::InvalidRequest("body is empty".to_string()));
        }
        let kind = ArtifactKind::human_edit(chapter)?;
        let outcome = self
            .ctx
            .artifacts
            .put_human_edit(&manuscript, chapter, content_type, body)
            .await?;
        Ok(HumanEditReceipt {
            kind,
            version: outcome.version(),
        })
    }

    pub async fn get_quota(&self, user_id: &str) -> Result<Quota, ServiceError> {
        require_user(user_id)?;
        Ok(self.ctx.usage.quota(user_id)?)
    }

    pub async fn list_dead_letters(
        &self,
        queue: Option<QueueName>,
        limit: Option<usize>,
    ) -> Result<Vec<DeadLetter>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        Ok(self.ctx.queue.list_dead_letters(queue, limit)?)
    }

    /// Replay a dead letter as a new job whose parent is the dead one.
    pub async fn requeue_dead_letter(&self, id: i64) -> Result<JobReceipt, ServiceError> {
        let letter = self
            .ctx
            .queue
            .list_dead_letters(None, DEAD_LETTER_SCAN)?
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| ServiceError::NotFound(format!("dead letter {id}")))?;
        let message = &letter.message;
        let manuscript = self
            .ctx
            .manuscripts
            .get(&message.manuscript_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("manuscript {}", message.manuscript_id)))?;

        let mut submission =
            Submission::new(&manuscript, message.pipeline).with_parent(message.report_id.clone());
        if let Some(kinds) = &message.kinds {
            submission = submission.with_kinds(kinds.clone());
        }
        let job = self.dispatcher.submit(submission).await?;

        if self.ctx.queue.take_dead_letter(id)?.is_none() {
            warn!(dead_letter_id = id, "Dead letter vanished while it was being requeued");
        }
        self.ctx
            .audit
            .emit(AuditEvent::JobRequeued {
                user_id: manuscript.user_id.clone(),
                manuscript_id: manuscript.id.clone(),
                report_id: job.report_id.clone(),
                parent_report_id: message.report_id.clone(),
            })
            .await;
        info!(
            dead_letter_id = id,
            report_id = %job.report_id,
            parent_report_id = %message.report_id,
            "Dead letter requeued"
        );
        Ok(JobReceipt::new(&job))
    }

    fn owned_manuscript(&self, user_id: &str, id: &str) -> Result<Manuscript, ServiceError> {
        require_user(user_id)?;
        self.ctx
            .manuscripts
            .get_owned(user_id, id)?
            .ok_or_else(|| ServiceError::NotFound(format!("manuscript {id}")))
    }

    fn owned_job(&self, user_id: &str, report_id: &str) -> Result<Job, ServiceError> {
        require_user(user_id)?;
        self.ctx
            .jobs
            .get(report_id)?
            .filter(|j| j.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("job {report_id}")))
    }

    async fn check_quota(&self, user_id: &str) -> Result<(), ServiceError> {
        let quota = self.ctx.usage.quota(user_id)?;
        if !quota.is_exhausted() {
            return Ok(());
        }
        self.ctx
            .audit
            .emit(AuditEvent::QuotaRejected {
                user_id: user_id.to_string(),
                plan_type: quota.plan_type.clone(),
                used: quota.used_this_period,
                limit: quota.plan_limit,
            })
            .await;
        Err(ServiceError::QuotaExceeded {
            plan_type: quota.plan_type,
            used: quota.used_this_period,
            limit: quota.plan_limit,
        })
    }
}

fn require_user(user_id: &str) -> Result<(), ServiceError> {
    if user_id.trim().is_empty() {
        return Err(ServiceError::Unauthorized);
    }
    Ok(())
}
