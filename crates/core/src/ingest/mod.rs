//! Manuscript ingestion: admission checks, raw blob write, manuscript row,
//! and the first analysis job.

mod detect;
mod text;

pub use detect::{resolve as resolve_file_type, FileType};
pub use text::{extract, extract_blocking, word_count, Extracted, WORDS_PER_PAGE};

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::context::PipelineContext;
use crate::dispatch::{DispatchError, Dispatcher, Submission};
use crate::job::Pipeline;
use crate::manuscript::{Manuscript, ManuscriptError, ManuscriptState};
use crate::metrics::UPLOADS;
use crate::status::{JobState, StatusUpdate};
use crate::storage::{ObjectMeta, StorageError};
use crate::usage::UsageError;

pub const DEFAULT_GENRE: &str = "general";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    BadFile(String),

    #[error("Quota exceeded: {used}/{limit} analyses used on the {plan_type} plan")]
    QuotaExceeded {
        plan_type: String,
        used: u32,
        limit: u32,
    },

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Manuscript(#[from] ManuscriptError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// One upload as received from the client.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub user_id: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Short name, MIME string, or `None` to go by the file name.
    pub declared_type: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub style_guide: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub manuscript_id: String,
    pub report_id: String,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

/// Object key of a raw manuscript: `{userId}/{manuscriptId}/{timestamp}_{name}`.
pub fn manuscript_key(user_id: &str, manuscript_id: &str, at: DateTime<Utc>, file_name: &str) -> String {
    format!(
        "{}/{}/{}_{}",
        user_id,
        manuscript_id,
        at.format("%Y%m%dT%H%M%SZ"),
        sanitize_file_name(file_name)
    )
}

/// Keep `[A-Za-z0-9._-]`, map everything else to `_`, never start with a dot.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "manuscript".to_string()
    } else {
        cleaned.chars().take(128).collect()
    }
}

fn title_from_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Untitled")
        .to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub struct Ingestor {
    ctx: Arc<PipelineContext>,
    dispatcher: Dispatcher,
}

impl Ingestor {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            dispatcher: Dispatcher::new(ctx.clone()),
            ctx,
        }
    }

    /// Admit an upload and queue its analysis.
    ///
    /// Admission failures (`BadFile`, `QuotaExceeded`) have no side effects.
    pub async fn upload(&self, req: UploadRequest) -> Result<UploadReceipt, IngestError> {
        let result = self.upload_inner(req).await;
        let label = match &result {
            Ok(_) => "accepted",
            Err(IngestError::BadFile(_)) => "bad_file",
            Err(IngestError::QuotaExceeded { .. }) => "quota_exceeded",
            Err(_) => "error",
        };
        UPLOADS.with_label_values(&[label]).inc();
        result
    }

    async fn upload_inner(&self, req: UploadRequest) -> Result<UploadReceipt, IngestError> {
        let ctx = &self.ctx;
        let limits = &ctx.config.pipeline;

        if req.bytes.is_empty() {
            return Err(IngestError::BadFile("file is empty".to_string()));
        }
        if req.bytes.len() as u64 > limits.max_file_bytes {
            return Err(IngestError::BadFile(format!(
                "file is {} bytes; the size limit is {} bytes",
                req.bytes.len(),
                limits.max_file_bytes
            )));
        }
        let file_type = resolve_file_type(req.declared_type.as_deref(), &req.file_name, &req.bytes)
            .map_err(IngestError::BadFile)?;

        // 1. Quota
        let quota = ctx.usage.quota(&req.user_id)?;
        if quota.is_exhausted() {
            ctx.audit
                .emit(AuditEvent::QuotaRejected {
                    user_id: req.user_id.clone(),
                    plan_type: quota.plan_type.clone(),
                    used: quota.used_this_period,
                    limit: quota.plan_limit,
                })
                .await;
            return Err(IngestError::QuotaExceeded {
                plan_type: quota.plan_type,
                used: quota.used_this_period,
                limit: quota.plan_limit,
            });
        }

        // 2. Hash and decode
        let content_hash = hex_sha256(&req.bytes);
        let extracted = extract_blocking(file_type, req.bytes.clone())
            .await
            .map_err(IngestError::BadFile)?;
        if extracted.word_count == 0 {
            return Err(IngestError::BadFile("no readable text found in file".to_string()));
        }
        if extracted.pages > u64::from(limits.max_pages) {
            return Err(IngestError::BadFile(format!(
                "manuscript has {} pages; the page limit is {}",
                extracted.pages, limits.max_pages
            )));
        }
        let duplicate_of = ctx.manuscripts.find_duplicate(&req.user_id, &content_hash)?;

        // 3. Ids
        let now = ctx.clock.now();
        let manuscript_id = Uuid::new_v4().to_string();
        let storage_key = manuscript_key(&req.user_id, &manuscript_id, now, &req.file_name);

        // 4. Raw bytes
        let size_bytes = req.bytes.len() as u64;
        let mut meta = ObjectMeta::new(file_type.mime())
            .with("user-id", req.user_id.as_str())
            .with("manuscript-id", manuscript_id.as_str())
            .with("content-hash", content_hash.as_str());
        if let Some(dup) = &duplicate_of {
            meta = meta.with("duplicate-of", dup.as_str());
        }
        ctx.objects.put(&storage_key, req.bytes, meta).await?;

        // 5. Manuscript row, then status, job and message
        let manuscript = Manuscript {
            id: manuscript_id.clone(),
            user_id: req.user_id.clone(),
            title: non_empty(req.title).unwrap_or_else(|| title_from_file_name(&req.file_name)),
            genre: non_empty(req.genre).unwrap_or_else(|| DEFAULT_GENRE.to_string()),
            style_guide: non_empty(req.style_guide),
            word_count: extracted.word_count,
            file_name: req.file_name.clone(),
            file_type: file_type.to_string(),
            file_size: size_bytes,
            content_hash: content_hash.clone(),
            storage_key: storage_key.clone(),
            state: ManuscriptState::Draft,
            flagged_for_review: false,
            duplicate_of: duplicate_of.clone(),
            latest_report_id: None,
            uploaded_at: now,
            updated_at: now,
        };
        if let Err(e) = ctx.manuscripts.insert(&manuscript) {
            self.discard_blob(&storage_key).await;
            return Err(e.into());
        }

        let job = match self
            .dispatcher
            .submit(Submission::new(&manuscript, Pipeline::Analysis))
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(manuscript_id = %manuscript_id, error = %e, "Upload failed after manuscript insert");
                self.mark_failed(&manuscript).await;
                return Err(e.into());
            }
        };

        // 6. Advisory audit entry
        ctx.audit
            .emit(AuditEvent::ManuscriptUploaded {
                user_id: req.user_id.clone(),
                manuscript_id: manuscript_id.clone(),
                report_id: job.report_id.clone(),
                file_name: req.file_name,
                file_type: file_type.to_string(),
                size_bytes,
                content_hash,
                duplicate_of: duplicate_of.clone(),
            })
            .await;
        ctx.artifacts.cache().invalidate_listing(&req.user_id);

        info!(
            manuscript_id = %manuscript_id,
            report_id = %job.report_id,
            file_type = %file_type,
            words = extracted.word_count,
            "Manuscript uploaded"
        );
        Ok(UploadReceipt {
            manuscript_id,
            report_id: job.report_id,
            status: JobState::Queued,
            duplicate_of,
        })
    }

    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.ctx.objects.delete(key).await {
            warn!(storage_key = key, error = %e, "Failed to remove orphaned manuscript blob");
        }
    }

    async fn mark_failed(&self, manuscript: &Manuscript) {
        match self.ctx.manuscripts.set_state(&manuscript.id, ManuscriptState::Failed) {
            Ok(from) => {
                self.ctx
                    .audit
                    .emit(AuditEvent::ManuscriptStateChanged {
                        manuscript_id: manuscript.id.clone(),
                        from_state: from.to_string(),
                        to_state: ManuscriptState::Failed.to_string(),
                        report_id: None,
                    })
                    .await;
            }
            Err(e) => warn!(manuscript_id = %manuscript.id, error = %e, "Failed to mark manuscript failed"),
        }
        if let Some(report_id) = self
            .ctx
            .manuscripts
            .get(&manuscript.id)
            .ok()
            .flatten()
            .and_then(|m| m.latest_report_id)
        {
            let update = StatusUpdate::state(JobState::Failed).with_message("upload failed");
            if let Err(e) = self.ctx.status.update(&report_id, update) {
                warn!(report_id = %report_id, error = %e, "Failed to mark status failed");
            }
        }
        self.ctx.artifacts.cache().invalidate_listing(&manuscript.user_id);
    }
}

pub(crate) fn hex_sha256(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
