//! Dependency container shared by the ingestor, the orchestrator and the
//! service layer. Built once at startup.

use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::{ArtifactCache, ArtifactStore};
use crate::audit::AuditHandle;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{Database, DbError};
use crate::job::JobStore;
use crate::kv::{KvStore, SqliteKvStore};
use crate::llm::{create_llm_client, LlmClient};
use crate::manuscript::ManuscriptStore;
use crate::queue::{JobQueue, SqliteJobQueue};
use crate::status::StatusTracker;
use crate::storage::{FsObjectStore, ObjectStore};
use crate::usage::UsageLedger;

pub struct PipelineContext {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub db: Arc<Database>,
    pub objects: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn JobQueue>,
    pub kv: Arc<dyn KvStore>,
    pub llm: Arc<dyn LlmClient>,
    pub audit: AuditHandle,
    pub manuscripts: ManuscriptStore,
    pub jobs: JobStore,
    pub status: StatusTracker,
    pub usage: UsageLedger,
    pub artifacts: ArtifactStore,
}

impl PipelineContext {
    pub fn builder(config: Config) -> PipelineContextBuilder {
        PipelineContextBuilder::new(config)
    }

    pub fn report_lookup_ttl(&self) -> Duration {
        Duration::from_secs(self.config.pipeline.report_lookup_ttl_secs)
    }
}

/// Every collaborator defaults to the production backend derived from the
/// config; tests swap in their own.
pub struct PipelineContextBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    db: Option<Arc<Database>>,
    objects: Option<Arc<dyn ObjectStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    kv: Option<Arc<dyn KvStore>>,
    llm: Option<Arc<dyn LlmClient>>,
    audit: Option<AuditHandle>,
}

impl PipelineContextBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: None,
            db: None,
            objects: None,
            queue: None,
            kv: None,
            llm: None,
            audit: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> Result<PipelineContext, DbError> {
        let config = self.config;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let db = match self.db {
            Some(db) => db,
            None => Arc::new(Database::open(&config.database.path)?),
        };
        let objects: Arc<dyn ObjectStore> = self
            .objects
            .unwrap_or_else(|| Arc::new(FsObjectStore::new(config.storage.root.clone())));
        let queue: Arc<dyn JobQueue> = self.queue.unwrap_or_else(|| {
            Arc::new(SqliteJobQueue::new(
                db.clone(),
                clock.clone(),
                Duration::from_secs(config.pipeline.visibility_timeout_secs),
            ))
        });
        let kv: Arc<dyn KvStore> = self
            .kv
            .unwrap_or_else(|| Arc::new(SqliteKvStore::new(db.clone(), clock.clone())));
        let llm = self.llm.unwrap_or_else(|| create_llm_client(&config.llm));

        let cache = ArtifactCache::new(&config.cache);
        Ok(PipelineContext {
            manuscripts: ManuscriptStore::new(db.clone(), clock.clone()),
            jobs: JobStore::new(db.clone(), clock.clone()),
            status: StatusTracker::new(
                kv.clone(),
                clock.clone(),
                Duration::from_secs(config.pipeline.status_ttl_secs),
            ),
            usage: UsageLedger::new(db.clone(), clock.clone(), config.billing.plans.clone()),
            artifacts: ArtifactStore::new(db.clone(), objects.clone(), cache, clock.clone()),
            audit: self.audit.unwrap_or_else(AuditHandle::disabled),
            config,
            clock,
            db,
            objects,
            queue,
            kv,
            llm,
        })
    }
}
