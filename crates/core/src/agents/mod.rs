//! AI agents that turn manuscript text into artifacts.
//!
//! One agent per [`ArtifactKind`]: a deterministic prompt, a model call
//! through the retrying client, and JSON extraction from the reply.

mod parse;
mod plan;
mod prompts;

pub use parse::{parse_model_json, strip_code_fences};
pub use plan::{dependencies, plan, stage_spec, ModelClass, StageSpec};
pub use prompts::{build_prompt, truncate_chars, Prompt, PromptInput};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::artifacts::ArtifactKind;
use crate::config::Config;
use crate::metrics;
use crate::llm::{
    CompletionRequest, LlmClient, LlmError, LlmUsage, PriceTable, RetryPolicy, RetryingLlmClient,
};

/// Why a stage did not produce its artifact.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("{0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    BadModelOutput(String),

    #[error("missing prerequisite {0}")]
    PreconditionMissing(String),

    #[error("object store unavailable: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("stage exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl StageError {
    /// Content errors will fail the same way on an immediate retry.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            StageError::BadModelOutput(_) | StageError::PreconditionMissing(_)
        )
    }
}

/// A stage failure, named by stage for user-facing messages.
#[derive(Debug, Clone, Error)]
#[error("{kind} stage failed: {error}")]
pub struct StageFailure {
    pub kind: ArtifactKind,
    pub error: StageError,
}

/// A generated artifact body with its metering.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub kind: ArtifactKind,
    pub body: Value,
    pub model: String,
    pub usage: LlmUsage,
    pub cost_usd: f64,
    pub duration: Duration,
}

/// Runs individual stages against the model provider.
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    pricing: PriceTable,
    editorial_model: String,
    creative_model: String,
    max_prompt_chars: usize,
}

impl AgentRunner {
    /// Wraps `llm` in the retry policy from `config`.
    pub fn new(llm: Arc<dyn LlmClient>, config: &Config) -> Self {
        let policy = RetryPolicy::from_config(&config.llm);
        Self {
            llm: Arc::new(RetryingLlmClient::new(llm, policy)),
            pricing: PriceTable::new(config.llm.pricing.clone()),
            editorial_model: config.llm.editorial_model.clone(),
            creative_model: config.llm.creative_model.clone(),
            max_prompt_chars: config.pipeline.max_prompt_chars,
        }
    }

    pub fn model_for(&self, kind: &ArtifactKind) -> &str {
        match stage_spec(kind).model_class {
            ModelClass::Editorial => &self.editorial_model,
            ModelClass::Creative => &self.creative_model,
        }
    }

    pub async fn run(
        &self,
        kind: &ArtifactKind,
        input: &PromptInput<'_>,
    ) -> Result<StageOutput, StageError> {
        let spec = stage_spec(kind);
        let prompt = build_prompt(kind, input, self.max_prompt_chars);
        let model = self.model_for(kind).to_string();

        let request = CompletionRequest::new(prompt.user)
            .with_model(model.clone())
            .with_system(prompt.system)
            .with_temperature(spec.temperature)
            .with_max_tokens(spec.max_tokens)
            .with_label(kind.to_string());

        let started = Instant::now();
        let response = self.llm.complete(request).await?;
        let body = parse_model_json(&response.text).map_err(StageError::BadModelOutput)?;

        // Meter on the model that answered; providers may alias ids.
        let served_by = if response.model.is_empty() {
            model
        } else {
            response.model
        };
        let cost_usd = self.pricing.cost(&served_by, response.usage);
        metrics::LLM_TOKENS
            .with_label_values(&[served_by.as_str(), "input"])
            .inc_by(u64::from(response.usage.input_tokens));
        metrics::LLM_TOKENS
            .with_label_values(&[served_by.as_str(), "output"])
            .inc_by(u64::from(response.usage.output_tokens));
        metrics::LLM_COST.inc_by(cost_usd);

        Ok(StageOutput {
            kind: kind.clone(),
            body,
            model: served_by,
            usage: response.usage,
            cost_usd,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::testing::{fixtures, MockLlmClient};

    fn runner(mock: Arc<MockLlmClient>) -> AgentRunner {
        AgentRunner::new(mock, &fixtures::test_config())
    }

    #[tokio::test]
    async fn test_run_parses_and_meters() {
        let mock = Arc::new(MockLlmClient::new());
        mock.respond("keywords", "```json\n{\"keywords\": [\"orchard\"]}\n```")
            .await;
        let runner = runner(mock.clone());

        let prior = BTreeMap::new();
        let out = runner
            .run(&ArtifactKind::Keywords, &fixtures::prompt_input(&prior))
            .await
            .unwrap();
        assert_eq!(out.body["keywords"][0], "orchard");
        assert!(out.cost_usd > 0.0);

        let calls = mock.requests().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].temperature, 0.7);
        assert_eq!(calls[0].label.as_deref(), Some("keywords"));
    }

    #[tokio::test]
    async fn test_bad_output_is_named_by_stage() {
        let mock = Arc::new(MockLlmClient::new());
        mock.respond("line-editing", "I think the prose is lovely.").await;
        let runner = runner(mock);

        let prior = BTreeMap::new();
        let err = runner
            .run(&ArtifactKind::LineEditing, &fixtures::prompt_input(&prior))
            .await
            .unwrap_err();
        assert!(err.is_content_error());

        let failure = StageFailure {
            kind: ArtifactKind::LineEditing,
            error: err,
        };
        assert_eq!(
            failure.to_string(),
            "line-editing stage failed: model output was not valid JSON"
        );
    }

    #[test]
    fn test_model_selection() {
        let mut config = fixtures::test_config();
        config.llm.editorial_model = "claude-opus-4".to_string();
        config.llm.creative_model = "claude-sonnet-4".to_string();
        let runner = AgentRunner::new(Arc::new(MockLlmClient::new()), &config);
        assert_eq!(runner.model_for(&ArtifactKind::Developmental), "claude-opus-4");
        assert_eq!(runner.model_for(&ArtifactKind::AuthorBio), "claude-sonnet-4");
    }
}
