use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::config::LlmConfig;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError};

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    /// Fractional jitter applied to each delay, e.g. 0.25 for ±25 %.
    pub jitter: f64,
    /// Deadline for one call.
    pub call_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.25,
            call_deadline: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            call_deadline: Duration::from_secs(config.deadline_secs),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), jittered.
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = self.factor.powi(retry.saturating_sub(1) as i32);
        let spread = if self.jitter > 0.0 {
            rand::rng().random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        self.base_delay.mul_f64((exp * (1.0 + spread)).max(0.0))
    }
}

/// Wraps a client with a per-call deadline and retries on transient errors.
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 1;
        loop {
            let result =
                match tokio::time::timeout(self.policy.call_deadline, self.inner.complete(request.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout(self.policy.call_deadline)),
                };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retriable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    tracing::warn!(
                        label = request.label.as_deref().unwrap_or(""),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
