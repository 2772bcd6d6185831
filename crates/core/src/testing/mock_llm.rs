//! Mock model provider for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, LlmUsage};

/// Called when a request with a matching label arrives, before it is answered.
type RequestHook = Arc<dyn Fn() + Send + Sync>;

/// Usage reported for every mock reply.
pub const MOCK_USAGE: LlmUsage = LlmUsage {
    input_tokens: 1_200,
    output_tokens: 400,
};

/// Mock implementation of the LlmClient trait.
///
/// Replies are keyed by the request label (the stage name for pipeline
/// calls). Queued replies are consumed in order; once a label's queue is
/// empty the mock answers with a small JSON object naming the stage.
///
/// # Example
///
/// ```rust,ignore
/// use inkwell_core::testing::MockLlmClient;
///
/// let llm = MockLlmClient::new();
/// llm.respond("keywords", r#"{"keywords": ["orchard"]}"#).await;
/// llm.fail_next("line-editing", LlmError::Http("reset".into())).await;
///
/// // ... run the pipeline ...
///
/// assert_eq!(llm.calls_for("line-editing").await, 2);
/// ```
pub struct MockLlmClient {
    /// Queued replies per label.
    replies: Arc<RwLock<HashMap<String, VecDeque<Result<String, LlmError>>>>>,
    /// Labels that fail on every call.
    failing: Arc<RwLock<HashMap<String, LlmError>>>,
    /// Every request received, in order.
    requests: Arc<RwLock<Vec<CompletionRequest>>>,
    /// Simulated latency per call.
    delay: Arc<RwLock<Option<Duration>>>,
    hooks: Arc<RwLock<HashMap<String, RequestHook>>>,
}

impl std::fmt::Debug for MockLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlmClient")
            .field("replies", &"<replies>")
            .field("failing", &"<failing>")
            .field("requests", &"<requests>")
            .field("hooks", &"<hooks>")
            .finish()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(RwLock::new(HashMap::new())),
            failing: Arc::new(RwLock::new(HashMap::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(None)),
            hooks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Queue a reply for the next call labelled `label`.
    pub async fn respond(&self, label: &str, text: &str) {
        self.replies
            .write()
            .await
            .entry(label.to_string())
            .or_default()
            .push_back(Ok(text.to_string()));
    }

    /// Queue a failure for the next call labelled `label`.
    pub async fn fail_next(&self, label: &str, error: LlmError) {
        self.replies
            .write()
            .await
            .entry(label.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Fail every call labelled `label` until [`clear_failures`](Self::clear_failures).
    pub async fn fail_always(&self, label: &str, error: LlmError) {
        self.failing.write().await.insert(label.to_string(), error);
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Run `hook` whenever a call labelled `label` arrives.
    pub async fn set_hook<F>(&self, label: &str, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .await
            .insert(label.to_string(), Arc::new(hook));
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.read().await.clone()
    }

    pub async fn calls_for(&self, label: &str) -> usize {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.label.as_deref() == Some(label))
            .count()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.read().await.len()
    }

    fn default_reply(label: &str) -> String {
        serde_json::json!({
            "stage": label,
            "summary": format!("{label} notes"),
            "items": [],
        })
        .to_string()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "claude-sonnet-mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let label = request.label.clone().unwrap_or_default();
        self.requests.write().await.push(request.clone());

        let hook = self.hooks.read().await.get(&label).cloned();
        if let Some(hook) = hook {
            hook();
        }

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failing.read().await.get(&label) {
            return Err(error.clone());
        }

        let queued = self
            .replies
            .write()
            .await
            .get_mut(&label)
            .and_then(|q| q.pop_front());
        let text = match queued {
            Some(reply) => reply?,
            None => Self::default_reply(&label),
        };

        Ok(CompletionResponse {
            text,
            usage: MOCK_USAGE,
            model: request
                .model
                .unwrap_or_else(|| self.model().to_string()),
        })
    }
}
