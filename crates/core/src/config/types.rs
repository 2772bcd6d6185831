use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Header carrying the user id set by the upstream session layer.
    #[serde(default = "default_user_header")]
    pub user_header: String,
    /// Shared key required when `method = "api_key"`.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Trust the user header set by a gateway in front of the service.
    TrustedHeader,
    /// Require a shared API key plus the user header.
    ApiKey,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("inkwell.db")
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/objects")
}

/// Price per million tokens for one model.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Anthropic API key.
    #[serde(default)]
    pub claude_api_key: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Model used by editorial stages (developmental, line, copy).
    #[serde(default = "default_editorial_model")]
    pub editorial_model: String,
    /// Model used by marketing and audiobook stages.
    #[serde(default = "default_creative_model")]
    pub creative_model: String,
    /// Per-call deadline.
    #[serde(default = "default_llm_deadline")]
    pub deadline_secs: u64,
    /// Attempts per call, including the first.
    #[serde(default = "default_llm_attempts")]
    pub max_attempts: u32,
    /// First backoff delay; doubles per retry.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// Overrides and additions to the built-in price table.
    #[serde(default)]
    pub pricing: BTreeMap<String, ModelPricing>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            claude_api_key: None,
            api_base: default_api_base(),
            editorial_model: default_editorial_model(),
            creative_model: default_creative_model(),
            deadline_secs: default_llm_deadline(),
            max_attempts: default_llm_attempts(),
            backoff_base_ms: default_backoff_base(),
            pricing: BTreeMap::new(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_editorial_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_creative_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_llm_deadline() -> u64 {
    120
}

fn default_llm_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

/// Pipeline limits, deadlines and queue behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Deliveries before a job is dead-lettered.
    #[serde(default = "default_queue_max_attempts")]
    pub queue_max_attempts: u32,
    /// Soft deadline for a single stage.
    #[serde(default = "default_stage_deadline")]
    pub stage_deadline_secs: u64,
    /// How long a received message stays invisible to other consumers.
    /// Renewed before every stage batch, so it must outlast one stage.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    /// Base redelivery delay after a failed attempt; multiplied by the attempt number.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Workers per queue in this process.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_status_ttl")]
    pub status_ttl_secs: u64,
    #[serde(default = "default_report_lookup_ttl")]
    pub report_lookup_ttl_secs: u64,
    /// Manuscript text is truncated to this many characters in prompts.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Interval of the expired key-value sweep.
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_pages: default_max_pages(),
            queue_max_attempts: default_queue_max_attempts(),
            stage_deadline_secs: default_stage_deadline(),
            visibility_timeout_secs: default_visibility_timeout(),
            retry_delay_secs: default_retry_delay(),
            poll_interval_ms: default_poll_interval(),
            worker_count: default_worker_count(),
            status_ttl_secs: default_status_ttl(),
            report_lookup_ttl_secs: default_report_lookup_ttl(),
            max_prompt_chars: default_max_prompt_chars(),
            gc_interval_secs: default_gc_interval(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_max_pages() -> u32 {
    828
}

fn default_queue_max_attempts() -> u32 {
    5
}

fn default_stage_deadline() -> u64 {
    600
}

fn default_visibility_timeout() -> u64 {
    900
}

fn default_retry_delay() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_worker_count() -> usize {
    2
}

fn default_status_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_report_lookup_ttl() -> u64 {
    30 * 24 * 3600
}

fn default_max_prompt_chars() -> usize {
    120_000
}

fn default_gc_interval() -> u64 {
    3600
}

/// Read-through cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
    #[serde(default)]
    pub ttl_secs: CacheTtlConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_cache_capacity(),
            ttl_secs: CacheTtlConfig::default(),
        }
    }
}

fn default_cache_capacity() -> u64 {
    10_000
}

/// TTL per cached view, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_manuscript_ttl")]
    pub manuscript: u64,
    #[serde(default = "default_analysis_status_ttl")]
    pub analysis_status: u64,
    #[serde(default = "default_listing_ttl")]
    pub listing: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            manuscript: default_manuscript_ttl(),
            analysis_status: default_analysis_status_ttl(),
            listing: default_listing_ttl(),
        }
    }
}

fn default_manuscript_ttl() -> u64 {
    900
}

fn default_analysis_status_ttl() -> u64 {
    3600
}

fn default_listing_ttl() -> u64 {
    300
}

/// Billing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    /// Only reported as configured or not; the billing collaborator owns its use.
    #[serde(default)]
    pub stripe_secret_key: Option<String>,
    /// Analyses allowed per billing period, by plan name.
    #[serde(default = "default_plans")]
    pub plans: BTreeMap<String, u32>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            plans: default_plans(),
        }
    }
}

fn default_plans() -> BTreeMap<String, u32> {
    BTreeMap::from([
        ("free".to_string(), 5),
        ("starter".to_string(), 20),
        ("professional".to_string(), 60),
        ("enterprise".to_string(), 500),
    ])
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub llm: SanitizedLlmConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub billing: SanitizedBillingConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub user_header: String,
    pub api_key_configured: bool,
}

/// Sanitized LLM config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedLlmConfig {
    pub claude_api_key_configured: bool,
    pub api_base: String,
    pub editorial_model: String,
    pub creative_model: String,
    pub deadline_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBillingConfig {
    pub stripe_secret_key_configured: bool,
    pub plans: BTreeMap<String, u32>,
}

fn is_set(secret: &Option<String>) -> bool {
    secret.as_deref().is_some_and(|s| !s.is_empty())
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: match config.auth.method {
                    AuthMethod::TrustedHeader => "trusted_header".to_string(),
                    AuthMethod::ApiKey => "api_key".to_string(),
                },
                user_header: config.auth.user_header.clone(),
                api_key_configured: is_set(&config.auth.api_key),
            },
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            llm: SanitizedLlmConfig {
                claude_api_key_configured: is_set(&config.llm.claude_api_key),
                api_base: config.llm.api_base.clone(),
                editorial_model: config.llm.editorial_model.clone(),
                creative_model: config.llm.creative_model.clone(),
                deadline_secs: config.llm.deadline_secs,
                max_attempts: config.llm.max_attempts,
            },
            pipeline: config.pipeline.clone(),
            cache: config.cache.clone(),
            billing: SanitizedBillingConfig {
                stripe_secret_key_configured: is_set(&config.billing.stripe_secret_key),
                plans: config.billing.plans.clone(),
            },
        }
    }
}
