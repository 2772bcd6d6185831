//! Job admission: status record, job row, queue message, manuscript state.
//!
//! Every path that starts a pipeline run (upload, manual start,
//! regeneration, dead-letter requeue) goes through [`Dispatcher::submit`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::artifacts::ArtifactKind;
use crate::audit::AuditEvent;
use crate::context::PipelineContext;
use crate::job::{new_report_id, Job, JobError, NewJob, Pipeline};
use crate::kv::report_lookup_key;
use crate::manuscript::{Manuscript, ManuscriptError, ManuscriptState};
use crate::queue::{JobMessage, QueueError, QueueName};
use crate::status::{JobState, StatusError, StatusUpdate};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Manuscript(#[from] ManuscriptError),
}

/// What to run against which manuscript.
#[derive(Debug, Clone)]
pub struct Submission<'a> {
    pub manuscript: &'a Manuscript,
    pub pipeline: Pipeline,
    pub kinds: Option<Vec<ArtifactKind>>,
    pub parent_report_id: Option<String>,
}

impl<'a> Submission<'a> {
    pub fn new(manuscript: &'a Manuscript, pipeline: Pipeline) -> Self {
        Self {
            manuscript,
            pipeline,
            kinds: None,
            parent_report_id: None,
        }
    }

    pub fn with_kinds(mut self, kinds: Vec<ArtifactKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn with_parent(mut self, parent_report_id: impl Into<String>) -> Self {
        self.parent_report_id = Some(parent_report_id.into());
        self
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<PipelineContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Admit a job. Order: JobStatus `queued`, job row, queue message, then
    /// the manuscript moves to `queued` for analysis runs.
    ///
    /// A failure after the status record exists marks it `failed` and
    /// deactivates the job row before the error is returned.
    pub async fn submit(&self, submission: Submission<'_>) -> Result<Job, DispatchError> {
        let ctx = &self.ctx;
        let manuscript = submission.manuscript;
        let report_id = new_report_id(ctx.clock.now());

        ctx.status.create(&report_id, submission.pipeline)?;

        let new_job = NewJob {
            report_id: report_id.clone(),
            manuscript_id: manuscript.id.clone(),
            user_id: manuscript.user_id.clone(),
            pipeline: submission.pipeline,
            genre: manuscript.genre.clone(),
            style_guide: manuscript.style_guide.clone(),
            kinds: submission.kinds.clone(),
            parent_report_id: submission.parent_report_id.clone(),
            prior_state: manuscript.state,
        };

        let job = match ctx.db.transaction(|tx| {
            let job = ctx.jobs.create_in(tx, &new_job)?;
            ctx.manuscripts
                .set_latest_report_in(tx, &manuscript.id, &report_id)
                .map_err(|e| JobError::Database(e.to_string()))?;
            Ok::<_, JobError>(job)
        }) {
            Ok(job) => job,
            Err(e) => {
                self.abort(&report_id, false, &e.to_string());
                return Err(e.into());
            }
        };

        let queue = QueueName::for_pipeline(submission.pipeline);
        let message = JobMessage {
            manuscript_key: manuscript.storage_key.clone(),
            report_id: report_id.clone(),
            genre: manuscript.genre.clone(),
            style_guide: manuscript.style_guide.clone(),
            pipeline: submission.pipeline,
            attempt: 0,
            manuscript_id: manuscript.id.clone(),
            user_id: manuscript.user_id.clone(),
            kinds: submission.kinds.clone(),
        };
        if let Err(e) = ctx.queue.enqueue(queue, &message) {
            self.abort(&report_id, true, &e.to_string());
            return Err(e.into());
        }

        if let Err(e) = ctx.kv.put(
            &report_lookup_key(&report_id),
            &manuscript.storage_key,
            Some(ctx.report_lookup_ttl()),
        ) {
            warn!(report_id = %report_id, error = %e, "Failed to write report lookup entry");
        }

        if submission.pipeline == Pipeline::Analysis {
            match ctx.manuscripts.set_state(&manuscript.id, ManuscriptState::Queued) {
                Ok(from) if from != ManuscriptState::Queued => {
                    ctx.audit
                        .emit(AuditEvent::ManuscriptStateChanged {
                            manuscript_id: manuscript.id.clone(),
                            from_state: from.to_string(),
                            to_state: ManuscriptState::Queued.to_string(),
                            report_id: Some(report_id.clone()),
                        })
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    // The message is already durable; the worker will find a
                    // failed status and drop it.
                    self.abort(&report_id, true, &e.to_string());
                    return Err(e.into());
                }
            }
        }

        ctx.audit
            .emit(AuditEvent::JobEnqueued {
                user_id: manuscript.user_id.clone(),
                manuscript_id: manuscript.id.clone(),
                report_id: report_id.clone(),
                pipeline: submission.pipeline.to_string(),
                queue: queue.to_string(),
                parent_report_id: submission.parent_report_id.clone(),
            })
            .await;
        ctx.artifacts
            .cache()
            .invalidate_status(&manuscript.user_id, &manuscript.id)
            .await;

        info!(
            report_id = %report_id,
            manuscript_id = %manuscript.id,
            pipeline = %submission.pipeline,
            queue = %queue,
            "Job enqueued"
        );
        Ok(job)
    }

    fn abort(&self, report_id: &str, job_created: bool, reason: &str) {
        error!(report_id, error = reason, "Job admission failed");
        let update = StatusUpdate::state(JobState::Failed)
            .with_message(format!("admission failed: {reason}"));
        if let Err(e) = self.ctx.status.update(report_id, update) {
            warn!(report_id, error = %e, "Failed to mark status failed");
        }
        if job_created {
            if let Err(e) = self.ctx.jobs.finish(report_id) {
                warn!(report_id, error = %e, "Failed to deactivate job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobQueue;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_submit_writes_status_job_and_message() {
        let ctx = fixtures::context();
        let m = fixtures::insert_manuscript(&ctx, "m1", "user-1");
        let dispatcher = Dispatcher::new(ctx.ctx.clone());

        let job = dispatcher
            .submit(Submission::new(&m, Pipeline::Analysis))
            .await
            .unwrap();

        let status = ctx.status.get(&job.report_id).unwrap().unwrap();
        assert_eq!(status.state, JobState::Queued);
        assert_eq!(status.progress, 0);

        assert_eq!(ctx.queue.depth(QueueName::Analysis).unwrap(), 1);
        let stored = ctx.manuscripts.get("m1").unwrap().unwrap();
        assert_eq!(stored.state, ManuscriptState::Queued);
        assert_eq!(stored.latest_report_id.as_deref(), Some(job.report_id.as_str()));
        assert_eq!(job.prior_state, ManuscriptState::Draft);
    }

    #[tokio::test]
    async fn test_assets_jobs_use_assets_queue_and_keep_state() {
        let ctx = fixtures::context();
        let m = fixtures::insert_manuscript(&ctx, "m1", "user-1");
        let dispatcher = Dispatcher::new(ctx.ctx.clone());

        dispatcher
            .submit(Submission::new(&m, Pipeline::Audiobook))
            .await
            .unwrap();

        assert_eq!(ctx.queue.depth(QueueName::Assets).unwrap(), 1);
        assert_eq!(ctx.queue.depth(QueueName::Analysis).unwrap(), 0);
        let stored = ctx.manuscripts.get("m1").unwrap().unwrap();
        assert_eq!(stored.state, ManuscriptState::Draft);
    }

    #[tokio::test]
    async fn test_second_active_job_is_rejected_and_marked_failed() {
        let ctx = fixtures::context();
        let m = fixtures::insert_manuscript(&ctx, "m1", "user-1");
        let dispatcher = Dispatcher::new(ctx.ctx.clone());

        dispatcher
            .submit(Submission::new(&m, Pipeline::Analysis))
            .await
            .unwrap();
        ctx.clock.advance(chrono::Duration::seconds(1));
        let err = dispatcher
            .submit(Submission::new(&m, Pipeline::Assets))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Job(JobError::ActiveJobExists(_))));
        assert_eq!(ctx.queue.depth(QueueName::Assets).unwrap(), 0);
    }
}
