use std::sync::Arc;

use inkwell_core::{
    audit::AuditStore, Authenticator, Config, PipelineContext, PipelineService, PipelineWorkers,
    SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    service: Arc<PipelineService>,
    audit_store: Arc<dyn AuditStore>,
    workers: Option<Arc<PipelineWorkers>>,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        service: Arc<PipelineService>,
        audit_store: Arc<dyn AuditStore>,
        workers: Option<Arc<PipelineWorkers>>,
    ) -> Self {
        Self {
            config,
            authenticator,
            service,
            audit_store,
            workers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn service(&self) -> &PipelineService {
        &self.service
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        self.service.context()
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    /// `None` when this process only serves the API.
    pub fn workers(&self) -> Option<&Arc<PipelineWorkers>> {
        self.workers.as_ref()
    }
}
