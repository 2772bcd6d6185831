//! Orchestrator configuration.

use std::time::Duration;

use crate::config::PipelineConfig;

/// Runtime knobs for the workers, derived from `[pipeline]`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deliveries allowed before a job is dead-lettered.
    pub max_attempts: u32,
    /// Base redelivery delay; multiplied by the attempt number.
    pub retry_delay: Duration,
    /// Soft deadline for a single stage.
    pub stage_deadline: Duration,
    /// Sleep between empty queue polls.
    pub poll_interval: Duration,
    /// Concurrent workers per process.
    pub worker_count: usize,
}

impl OrchestratorConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.queue_max_attempts,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            stage_deadline: Duration::from_secs(config.stage_deadline_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            worker_count: config.worker_count,
        }
    }

    /// Delay before redelivering after failed attempt `attempt`.
    pub fn retry_after(&self, attempt: u32) -> Duration {
        self.retry_delay * attempt.max(1)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_pipeline(&PipelineConfig::default())
    }
}
