//! Pipeline orchestrator implementation.
//!
//! Executes one delivery at a time:
//! - Admission: terminal status, crash-loop and ownership checks
//! - Stages: batches in order, stages within a batch concurrently
//! - Settlement: ack, nack with backoff, or dead-letter

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::agents::{dependencies, plan, AgentRunner, PromptInput, StageError, StageFailure};
use crate::artifacts::{ArtifactError, ArtifactKind, PublishOutcome, PublishRequest};
use crate::audit::AuditEvent;
use crate::context::PipelineContext;
use crate::ingest::{extract_blocking, FileType};
use crate::job::{Job, Pipeline};
use crate::manuscript::{Manuscript, ManuscriptState};
use crate::metrics::{DEAD_LETTERS, JOBS_FINISHED, JOB_RETRIES, STAGE_DURATION};
use crate::queue::{Delivery, QueueError};
use crate::status::{JobState, StatusError, StatusUpdate};
use crate::usage::AnalysisKind;

use super::config::OrchestratorConfig;
use super::types::{JobOutcome, OrchestratorError};

/// Planned stages of one run and how many are done.
struct StageProgress {
    planned: Vec<ArtifactKind>,
    finished: Mutex<BTreeSet<ArtifactKind>>,
    done: AtomicUsize,
}

impl StageProgress {
    fn new(planned: Vec<ArtifactKind>, finished: BTreeSet<ArtifactKind>) -> Self {
        Self {
            done: AtomicUsize::new(finished.len()),
            finished: Mutex::new(finished),
            planned,
        }
    }

    fn percent(done: usize, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        ((100 * done) / total).min(100) as u8
    }

    fn current(&self) -> u8 {
        Self::percent(self.done.load(Ordering::SeqCst), self.planned.len())
    }

    fn is_finished(&self, kind: &ArtifactKind) -> bool {
        self.finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(kind)
    }

    /// Record `kind` as done; returns the new percentage and the next stage.
    fn finish(&self, kind: &ArtifactKind) -> (u8, Option<ArtifactKind>) {
        let mut finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        finished.insert(kind.clone());
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self
            .planned
            .iter()
            .find(|k| !finished.contains(*k))
            .cloned();
        (Self::percent(done, self.planned.len()), next)
    }

    fn next_pending(&self) -> Option<ArtifactKind> {
        let finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        self.planned
            .iter()
            .find(|k| !finished.contains(*k))
            .cloned()
    }
}

/// Runs pipeline jobs pulled from the queue.
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    runner: AgentRunner,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            runner: AgentRunner::new(ctx.llm.clone(), &ctx.config),
            config: OrchestratorConfig::from_pipeline(&ctx.config.pipeline),
            ctx,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute one delivery and settle it with the queue.
    pub async fn handle(&self, delivery: Delivery) -> JobOutcome {
        let outcome = self.execute(&delivery).await;
        if let Err(e) = self.settle(&delivery, &outcome) {
            error!(
                report_id = %delivery.message.report_id,
                delivery_id = delivery.id,
                error = %e,
                "Failed to settle delivery; it will be redelivered"
            );
        }
        outcome
    }

    fn settle(&self, delivery: &Delivery, outcome: &JobOutcome) -> Result<(), QueueError> {
        match outcome {
            JobOutcome::Retrying { attempt, error } => {
                JOB_RETRIES
                    .with_label_values(&[delivery.message.pipeline.as_str()])
                    .inc();
                self.ctx
                    .queue
                    .nack(delivery, self.config.retry_after(*attempt), error)
            }
            JobOutcome::DeadLettered { error } => {
                DEAD_LETTERS.inc();
                self.ctx.queue.dead_letter(delivery, error)
            }
            JobOutcome::Superseded => Ok(()),
            _ => self.ctx.queue.ack(delivery),
        }
    }

    /// Run the job carried by `delivery` without touching the queue.
    pub async fn execute(&self, delivery: &Delivery) -> JobOutcome {
        match self.try_execute(delivery).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail(delivery, &e.to_string()).await,
        }
    }

    async fn try_execute(&self, delivery: &Delivery) -> Result<JobOutcome, OrchestratorError> {
        let ctx = &self.ctx;
        let report_id = delivery.message.report_id.as_str();
        let attempt = delivery.attempts;

        let Some(job) = ctx.jobs.get(report_id)? else {
            warn!(report_id, "No job row for delivery; dropping it");
            return Ok(JobOutcome::Skipped {
                reason: "unknown job".to_string(),
            });
        };

        let status = match ctx.status.get(report_id)? {
            Some(status) => status,
            None => ctx.status.create(report_id, job.pipeline)?,
        };
        if status.state.is_terminal() {
            info!(report_id, state = %status.state, "Job already finished; acknowledging delivery");
            if status.state == JobState::Cancelled && job.active {
                return Ok(self.cancelled(&job).await);
            }
            if job.active {
                ctx.jobs.finish(report_id)?;
            }
            return Ok(JobOutcome::Skipped {
                reason: format!("job already {}", status.state),
            });
        }

        if attempt > self.config.max_attempts {
            let reason = format!(
                "delivery attempts exhausted ({} of {})",
                attempt - 1,
                self.config.max_attempts
            );
            return Ok(self.exhaust(&job, &reason).await);
        }

        ctx.jobs.record_attempt(report_id, attempt)?;

        let Some(manuscript) = ctx.manuscripts.get(&job.manuscript_id)? else {
            warn!(report_id, manuscript_id = %job.manuscript_id, "Manuscript is gone; dropping job");
            if let Err(e) = ctx
                .status
                .update(report_id, StatusUpdate::state(JobState::Failed).with_message("manuscript was deleted"))
            {
                warn!(report_id, error = %e, "Failed to mark status failed");
            }
            if let Err(e) = ctx.jobs.finish(report_id) {
                warn!(report_id, error = %e, "Failed to finish job row");
            }
            return Ok(JobOutcome::Skipped {
                reason: "manuscript deleted".to_string(),
            });
        };

        let batches = plan(job.pipeline, job.kinds.as_deref());
        let planned: Vec<ArtifactKind> = batches.iter().flatten().cloned().collect();
        let mut already = BTreeSet::new();
        for kind in &planned {
            if ctx.artifacts.index().published_by(&manuscript.id, kind, report_id)? {
                already.insert(kind.clone());
            }
        }
        let progress = StageProgress::new(planned.clone(), already);

        let mut running = StatusUpdate::state(JobState::Running)
            .with_attempt(attempt)
            .with_progress(progress.current())
            .with_message(format!(
                "attempt {} of {}",
                attempt, self.config.max_attempts
            ));
        if let Some(stage) = progress.next_pending() {
            running = running.with_stage(stage.to_string());
        }
        match ctx.status.update(report_id, running) {
            Ok(_) => {}
            Err(StatusError::IllegalTransition { .. }) => return Ok(self.cancelled(&job).await),
            Err(e) => return Err(e.into()),
        }

        if job.pipeline == Pipeline::Analysis {
            self.move_manuscript(&manuscript, ManuscriptState::Analyzing, Some(report_id))
                .await?;
        } else if ctx
            .artifacts
            .index()
            .get(&manuscript.id, &ArtifactKind::Developmental)?
            .is_none()
        {
            let first = planned.first().cloned().unwrap_or(ArtifactKind::Developmental);
            return Err(StageFailure {
                kind: first,
                error: StageError::PreconditionMissing("developmental artifact".to_string()),
            }
            .into());
        }

        info!(
            report_id,
            pipeline = %job.pipeline,
            attempt,
            planned = planned.len(),
            "Running job"
        );

        let text = self.load_text(&manuscript).await?;
        let mut prior = self.load_prior(&manuscript, &planned).await?;

        for batch in &batches {
            if ctx.status.is_cancelled(report_id)? {
                return Ok(self.cancelled(&job).await);
            }
            if !self.renew_lease(delivery) {
                return Ok(JobOutcome::Superseded);
            }

            let pending: Vec<&ArtifactKind> =
                batch.iter().filter(|k| !progress.is_finished(k)).collect();
            if pending.is_empty() {
                debug!(report_id, "Batch already published by this job");
                continue;
            }

            let results = {
                let input = PromptInput {
                    title: &manuscript.title,
                    genre: &job.genre,
                    style_guide: job.style_guide.as_deref(),
                    text: &text,
                    prior: &prior,
                };
                join_all(pending.iter().map(|kind| {
                    self.run_stage(&job, &manuscript, kind, &input, &progress, attempt)
                }))
                .await
            };

            let mut failure = None;
            for result in results {
                match result {
                    Ok(Some((kind, body))) => {
                        prior.insert(kind, body);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                }
            }
            if let Some(failure) = failure {
                return Err(failure.into());
            }
        }

        if ctx.status.is_cancelled(report_id)? {
            return Ok(self.cancelled(&job).await);
        }
        self.complete(&job, &manuscript).await
    }

    /// Keep the delivery invisible for another full timeout. `false` once
    /// another worker has picked the message up.
    fn renew_lease(&self, delivery: &Delivery) -> bool {
        match self.ctx.queue.extend_lease(delivery) {
            Ok(()) => true,
            Err(QueueError::LeaseLost(_)) => {
                warn!(
                    report_id = %delivery.message.report_id,
                    delivery_id = delivery.id,
                    "Lease lost; abandoning delivery to its new holder"
                );
                false
            }
            Err(e) => {
                warn!(report_id = %delivery.message.report_id, error = %e, "Failed to renew lease");
                true
            }
        }
    }

    /// One stage: model call under the stage deadline, then two-phase
    /// publication. `Ok(None)` means the job was cancelled before it started.
    async fn run_stage(
        &self,
        job: &Job,
        manuscript: &Manuscript,
        kind: &ArtifactKind,
        input: &PromptInput<'_>,
        progress: &StageProgress,
        attempt: u32,
    ) -> Result<Option<(ArtifactKind, Value)>, StageFailure> {
        let ctx = &self.ctx;
        let report_id = job.report_id.as_str();
        let stage = kind.to_string();

        if ctx.status.is_cancelled(report_id).unwrap_or(false) {
            debug!(report_id, stage = %stage, "Job cancelled; not starting stage");
            return Ok(None);
        }

        let started = Instant::now();
        let deadline = self.config.stage_deadline;
        let result = match tokio::time::timeout(deadline, self.runner.run(kind, input)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::DeadlineExceeded(deadline)),
        };
        let published = match result {
            Ok(output) => self.publish(job, manuscript, output).await,
            Err(e) => Err(e),
        };

        let (body, outcome) = match published {
            Ok(done) => done,
            Err(error) => {
                STAGE_DURATION
                    .with_label_values(&[stage.as_str(), "failure"])
                    .observe(started.elapsed().as_secs_f64());
                warn!(report_id, stage = %stage, attempt, error = %error, "Stage failed");
                ctx.audit
                    .emit(AuditEvent::StageFailed {
                        manuscript_id: manuscript.id.clone(),
                        report_id: report_id.to_string(),
                        stage: stage.clone(),
                        attempt,
                        error: error.to_string(),
                    })
                    .await;
                return Err(StageFailure {
                    kind: kind.clone(),
                    error,
                });
            }
        };

        STAGE_DURATION
            .with_label_values(&[stage.as_str(), "success"])
            .observe(started.elapsed().as_secs_f64());

        let (percent, next) = progress.finish(kind);
        let update = StatusUpdate::state(JobState::StageDone)
            .with_progress(percent)
            .with_stage(next.as_ref().unwrap_or(kind).to_string())
            .with_message(format!("{stage} complete"));
        match ctx.status.update(report_id, update) {
            Ok(_) => {}
            Err(StatusError::IllegalTransition { from, .. }) => {
                debug!(report_id, stage = %stage, state = %from, "Progress not recorded; job is terminal");
            }
            Err(e) => warn!(report_id, stage = %stage, error = %e, "Failed to record progress"),
        }

        info!(report_id, stage = %stage, progress = percent, ?outcome, "Stage complete");
        Ok(Some((kind.clone(), body)))
    }

    async fn publish(
        &self,
        job: &Job,
        manuscript: &Manuscript,
        output: crate::agents::StageOutput,
    ) -> Result<(Value, PublishOutcome), StageError> {
        let ctx = &self.ctx;
        let body = serde_json::to_vec(&output.body)
            .map_err(|e| StageError::BadModelOutput(e.to_string()))?;
        let size_bytes = body.len() as u64;

        let outcome = ctx
            .artifacts
            .publish(PublishRequest {
                user_id: manuscript.user_id.clone(),
                manuscript_id: manuscript.id.clone(),
                manuscript_key: manuscript.storage_key.clone(),
                kind: output.kind.clone(),
                report_id: Some(job.report_id.clone()),
                content_type: "application/json".to_string(),
                body,
                model: output.model.clone(),
                usage: output.usage,
                cost_usd: output.cost_usd,
            })
            .await
            .map_err(|e| match e {
                ArtifactError::Storage(e) => StageError::Storage(e.to_string()),
                other => StageError::Database(other.to_string()),
            })?;

        ctx.audit
            .emit(AuditEvent::StageCompleted {
                manuscript_id: manuscript.id.clone(),
                report_id: job.report_id.clone(),
                stage: output.kind.to_string(),
                model: output.model.clone(),
                input_tokens: output.usage.input_tokens,
                output_tokens: output.usage.output_tokens,
                cost_usd: output.cost_usd,
                duration_ms: output.duration.as_millis() as u64,
            })
            .await;
        if let PublishOutcome::Published {
            version,
            storage_key,
        } = &outcome
        {
            ctx.audit
                .emit(AuditEvent::ArtifactPublished {
                    manuscript_id: manuscript.id.clone(),
                    report_id: Some(job.report_id.clone()),
                    kind: output.kind.to_string(),
                    version: *version,
                    storage_key: storage_key.clone(),
                    size_bytes,
                })
                .await;
        }
        Ok((output.body, outcome))
    }

    /// Pre-stage: fetch the raw manuscript and decode it to text.
    async fn load_text(&self, manuscript: &Manuscript) -> Result<String, OrchestratorError> {
        let object = self
            .ctx
            .objects
            .get(&manuscript.storage_key)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Decode(format!("no object at {}", manuscript.storage_key))
            })?;
        let file_type = FileType::from_declared(&manuscript.file_type).ok_or_else(|| {
            OrchestratorError::Decode(format!("unknown file type {}", manuscript.file_type))
        })?;
        let extracted = extract_blocking(file_type, object.bytes)
            .await
            .map_err(OrchestratorError::Decode)?;
        Ok(extracted.text)
    }

    /// Published artifacts the planned stages depend on.
    async fn load_prior(
        &self,
        manuscript: &Manuscript,
        planned: &[ArtifactKind],
    ) -> Result<BTreeMap<ArtifactKind, Value>, OrchestratorError> {
        let needed: BTreeSet<ArtifactKind> = planned.iter().flat_map(dependencies).collect();

        let mut prior = BTreeMap::new();
        for kind in needed {
            let Some(body) = self
                .ctx
                .artifacts
                .get_artifact(&manuscript.user_id, &manuscript.id, &kind)
                .await?
            else {
                continue;
            };
            match serde_json::from_slice::<Value>(&body.bytes) {
                Ok(value) => {
                    prior.insert(kind, value);
                }
                Err(e) => warn!(manuscript_id = %manuscript.id, kind = %kind, error = %e, "Skipping unreadable prior artifact"),
            }
        }
        Ok(prior)
    }

    /// Success: manuscript state and the usage event commit together.
    async fn complete(
        &self,
        job: &Job,
        manuscript: &Manuscript,
    ) -> Result<JobOutcome, OrchestratorError> {
        let ctx = &self.ctx;
        let report_id = job.report_id.as_str();
        let analysis_type = match job.pipeline {
            Pipeline::Analysis => AnalysisKind::Full,
            Pipeline::Assets | Pipeline::Audiobook => AnalysisKind::Basic,
        };

        let quota = ctx.usage.quota(&job.user_id)?;
        let event = ctx
            .usage
            .event_for(&quota, &job.user_id, &manuscript.id, report_id, analysis_type);

        let (from, recorded) = ctx.db.transaction(|tx| {
            let from = match job.pipeline {
                Pipeline::Analysis => Some(ctx.manuscripts.set_state_in(
                    tx,
                    &manuscript.id,
                    ManuscriptState::Analyzed,
                )?),
                _ => None,
            };
            let recorded = ctx.usage.record_in(tx, &event)?;
            ctx.jobs.finish_in(tx, report_id)?;
            Ok::<_, OrchestratorError>((from, recorded))
        })?;

        let total_cost_usd = ctx.artifacts.index().cost_for_report(&manuscript.id, report_id)?;
        let update = StatusUpdate::state(JobState::Complete)
            .with_progress(100)
            .with_message(format!("complete; cost ${total_cost_usd:.4}"));
        if let Err(e) = ctx.status.update(report_id, update) {
            warn!(report_id, error = %e, "Failed to mark status complete");
        }

        if let Some(from) = from.filter(|f| *f != ManuscriptState::Analyzed) {
            ctx.audit
                .emit(AuditEvent::ManuscriptStateChanged {
                    manuscript_id: manuscript.id.clone(),
                    from_state: from.to_string(),
                    to_state: ManuscriptState::Analyzed.to_string(),
                    report_id: Some(report_id.to_string()),
                })
                .await;
        }
        if recorded {
            ctx.audit
                .emit(AuditEvent::UsageRecorded {
                    user_id: job.user_id.clone(),
                    manuscript_id: manuscript.id.clone(),
                    report_id: report_id.to_string(),
                    plan_type: event.plan_type.clone(),
                    analysis_type: analysis_type.as_str().to_string(),
                    total_cost_usd,
                })
                .await;
        }
        ctx.audit
            .emit(AuditEvent::JobStateChanged {
                report_id: report_id.to_string(),
                from_state: JobState::Running.to_string(),
                to_state: JobState::Complete.to_string(),
                message: None,
            })
            .await;

        JOBS_FINISHED
            .with_label_values(&[job.pipeline.as_str(), "complete"])
            .inc();
        ctx.artifacts
            .cache()
            .invalidate_status(&job.user_id, &manuscript.id)
            .await;

        info!(report_id, total_cost_usd, "Job complete");
        Ok(JobOutcome::Completed { total_cost_usd })
    }

    /// Cooperative stop. Analysis jobs roll the manuscript back to draft.
    async fn cancelled(&self, job: &Job) -> JobOutcome {
        let ctx = &self.ctx;
        if job.pipeline == Pipeline::Analysis {
            if let Ok(Some(manuscript)) = ctx.manuscripts.get(&job.manuscript_id) {
                if let Err(e) = self
                    .move_manuscript(&manuscript, ManuscriptState::Draft, Some(&job.report_id))
                    .await
                {
                    warn!(report_id = %job.report_id, error = %e, "Failed to roll manuscript back");
                }
            }
        }
        if let Err(e) = ctx.jobs.finish(&job.report_id) {
            warn!(report_id = %job.report_id, error = %e, "Failed to deactivate job");
        }

        JOBS_FINISHED
            .with_label_values(&[job.pipeline.as_str(), "cancelled"])
            .inc();
        ctx.artifacts
            .cache()
            .invalidate_status(&job.user_id, &job.manuscript_id)
            .await;
        info!(report_id = %job.report_id, "Job cancelled");
        JobOutcome::Cancelled
    }

    /// A failed attempt: retry while attempts remain, otherwise give up.
    async fn fail(&self, delivery: &Delivery, error: &str) -> JobOutcome {
        let ctx = &self.ctx;
        let report_id = delivery.message.report_id.as_str();
        let attempt = delivery.attempts;

        let job = match ctx.jobs.get(report_id) {
            Ok(job) => job,
            Err(e) => {
                warn!(report_id, error = %e, "Failed to load job after failure");
                None
            }
        };

        if ctx.status.is_cancelled(report_id).unwrap_or(false) {
            if let Some(job) = &job {
                return self.cancelled(job).await;
            }
            return JobOutcome::Cancelled;
        }

        if attempt < self.config.max_attempts {
            let message = format!(
                "{error} (attempt {attempt} of {}); retrying",
                self.config.max_attempts
            );
            let update = StatusUpdate::state(JobState::Running)
                .with_attempt(attempt)
                .with_message(message);
            if let Err(e) = ctx.status.update(report_id, update) {
                warn!(report_id, error = %e, "Failed to record retry in status");
            }
            warn!(report_id, attempt, error, "Attempt failed; job will be redelivered");
            return JobOutcome::Retrying {
                attempt,
                error: error.to_string(),
            };
        }

        match job {
            Some(job) => self.exhaust(&job, error).await,
            None => {
                let update = StatusUpdate::state(JobState::Failed).with_message(error);
                if let Err(e) = ctx.status.update(report_id, update) {
                    warn!(report_id, error = %e, "Failed to mark status failed");
                }
                JobOutcome::DeadLettered {
                    error: error.to_string(),
                }
            }
        }
    }

    /// Attempts exhausted: terminal `failed`, rollback, no usage.
    async fn exhaust(&self, job: &Job, error: &str) -> JobOutcome {
        let ctx = &self.ctx;
        let report_id = job.report_id.as_str();

        let update = StatusUpdate::state(JobState::Failed).with_message(error);
        if let Err(e) = ctx.status.update(report_id, update) {
            warn!(report_id, error = %e, "Failed to mark status failed");
        }

        if job.pipeline == Pipeline::Analysis && job.prior_state == ManuscriptState::Draft {
            if let Ok(Some(manuscript)) = ctx.manuscripts.get(&job.manuscript_id) {
                if let Err(e) = self
                    .move_manuscript(&manuscript, ManuscriptState::Draft, Some(report_id))
                    .await
                {
                    warn!(report_id, error = %e, "Failed to roll manuscript back");
                }
            }
        }
        if let Err(e) = ctx.jobs.finish(report_id) {
            warn!(report_id, error = %e, "Failed to deactivate job");
        }

        ctx.audit
            .emit(AuditEvent::JobDeadLettered {
                manuscript_id: job.manuscript_id.clone(),
                report_id: report_id.to_string(),
                attempts: ctx.jobs.get(report_id).ok().flatten().map_or(0, |j| j.attempt),
                reason: error.to_string(),
            })
            .await;
        JOBS_FINISHED
            .with_label_values(&[job.pipeline.as_str(), "failed"])
            .inc();
        ctx.artifacts
            .cache()
            .invalidate_status(&job.user_id, &job.manuscript_id)
            .await;

        error!(report_id, error, "Job failed; attempts exhausted");
        JobOutcome::DeadLettered {
            error: error.to_string(),
        }
    }

    async fn move_manuscript(
        &self,
        manuscript: &Manuscript,
        to: ManuscriptState,
        report_id: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let from = self.ctx.manuscripts.set_state(&manuscript.id, to)?;
        if from != to {
            self.ctx
                .audit
                .emit(AuditEvent::ManuscriptStateChanged {
                    manuscript_id: manuscript.id.clone(),
                    from_state: from.to_string(),
                    to_state: to.to_string(),
                    report_id: report_id.map(str::to_string),
                })
                .await;
            self.ctx
                .artifacts
                .cache()
                .invalidate_status(&manuscript.user_id, &manuscript.id)
                .await;
        }
        Ok(())
    }
}
