//! Model provider boundary: client trait, Anthropic adapter, retry wrapper
//! and the price table used to meter cost.

mod client;
mod pricing;
mod retry;

pub use client::{
    AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError, LlmUsage,
    UnconfiguredClient,
};
pub use pricing::PriceTable;
pub use retry::{RetryPolicy, RetryingLlmClient};

use std::sync::Arc;

use crate::config::LlmConfig;

/// Provider client for `config`, or one that always reports `NotConfigured`.
pub fn create_llm_client(config: &LlmConfig) -> Arc<dyn LlmClient> {
    match config.claude_api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => Arc::new(
            AnthropicClient::new(key, config.editorial_model.clone())
                .with_api_base(config.api_base.clone()),
        ),
        None => {
            tracing::warn!("No Claude API key configured; pipeline stages will fail");
            Arc::new(UnconfiguredClient)
        }
    }
}
