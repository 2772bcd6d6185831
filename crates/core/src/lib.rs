pub mod agents;
pub mod artifacts;
pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod ingest;
pub mod job;
pub mod kv;
pub mod llm;
pub mod manuscript;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod service;
pub mod status;
pub mod storage;
pub mod testing;
pub mod usage;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    TrustedHeaderAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use context::PipelineContext;
pub use orchestrator::{JobOutcome, Orchestrator, PipelineWorkers};
pub use service::{AnalysisStatus, PipelineService, ServiceError};
