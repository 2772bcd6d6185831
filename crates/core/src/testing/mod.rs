//! Testing utilities: a scripted model provider and fixtures that assemble
//! a complete in-memory pipeline.
//!
//! # Example
//!
//! ```rust,ignore
//! use inkwell_core::testing::fixtures;
//!
//! let t = fixtures::context();
//! let m = fixtures::seed_manuscript(&t, "m1", "user-1", 2_000).await;
//! t.llm.respond("developmental", r#"{"summary": "tighten act two"}"#).await;
//! ```

mod mock_llm;

pub use mock_llm::{MockLlmClient, MOCK_USAGE};

pub use crate::clock::ManualClock;
pub use crate::storage::MemoryObjectStore;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::BTreeMap;
    use std::ops::Deref;
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;

    use super::{ManualClock, MemoryObjectStore, MockLlmClient};
    use crate::agents::PromptInput;
    use crate::artifacts::ArtifactKind;
    use crate::clock::Clock;
    use crate::config::{
        AuthConfig, AuthMethod, BillingConfig, CacheConfig, Config, DatabaseConfig, LlmConfig,
        PipelineConfig, ServerConfig, StorageConfig,
    };
    use crate::context::PipelineContext;
    use crate::db::Database;
    use crate::job::Pipeline;
    use crate::kv::{KvStore, SqliteKvStore};
    use crate::manuscript::{Manuscript, ManuscriptState};
    use crate::queue::JobMessage;
    use crate::storage::{ObjectMeta, ObjectStore};
    use crate::usage::AnalysisKind;

    /// 2026-03-01T09:00:00Z, the start of every test clock.
    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    /// Migrated in-memory database and a clock at [`base_time`].
    pub fn database() -> (Arc<Database>, Arc<ManualClock>) {
        let db = Database::in_memory().expect("in-memory database");
        (Arc::new(db), Arc::new(ManualClock::new(base_time())))
    }

    /// [`database`] with draft manuscript `id` owned by `user-1`.
    pub fn database_with_manuscript(id: &str) -> (Arc<Database>, Arc<ManualClock>) {
        let (db, clock) = database();
        crate::manuscript::ManuscriptStore::new(db.clone(), clock.clone())
            .insert(&manuscript(id, "user-1", base_time()))
            .expect("insert manuscript");
        (db, clock)
    }

    pub fn kv() -> (Arc<dyn KvStore>, Arc<ManualClock>) {
        let (db, clock) = database();
        (Arc::new(SqliteKvStore::new(db, clock.clone())), clock)
    }

    /// A plain-text draft manuscript with a unique content hash.
    pub fn manuscript(id: &str, user_id: &str, uploaded_at: DateTime<Utc>) -> Manuscript {
        Manuscript {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: "The Orchard".to_string(),
            genre: "literary".to_string(),
            style_guide: None,
            word_count: 2_000,
            file_name: "the_orchard.txt".to_string(),
            file_type: "txt".to_string(),
            file_size: 12_000,
            content_hash: format!("hash-{id}"),
            storage_key: format!(
                "{user_id}/{id}/{}_the_orchard.txt",
                uploaded_at.format("%Y%m%dT%H%M%SZ")
            ),
            state: ManuscriptState::Draft,
            flagged_for_review: false,
            duplicate_of: None,
            latest_report_id: None,
            uploaded_at,
            updated_at: uploaded_at,
        }
    }

    pub fn job_message(report_id: &str, manuscript_id: &str, pipeline: Pipeline) -> JobMessage {
        JobMessage {
            manuscript_key: format!("user-1/{manuscript_id}/20260301T090000Z_the_orchard.txt"),
            report_id: report_id.to_string(),
            genre: "literary".to_string(),
            style_guide: None,
            pipeline,
            attempt: 0,
            manuscript_id: manuscript_id.to_string(),
            user_id: "user-1".to_string(),
            kinds: None,
        }
    }

    /// Defaults with limits small enough for tests.
    pub fn test_config() -> Config {
        Config {
            auth: AuthConfig {
                method: AuthMethod::TrustedHeader,
                user_header: "x-user-id".to_string(),
                api_key: None,
            },
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig {
                max_file_bytes: 4 * 1024 * 1024,
                stage_deadline_secs: 5,
                retry_delay_secs: 1,
                poll_interval_ms: 10,
                worker_count: 1,
                ..PipelineConfig::default()
            },
            cache: CacheConfig::default(),
            billing: BillingConfig::default(),
        }
    }

    pub fn prompt_input(prior: &BTreeMap<ArtifactKind, Value>) -> PromptInput<'_> {
        PromptInput {
            title: "The Orchard",
            genre: "literary",
            style_guide: None,
            text: "The apples fell early that year. Nobody in the valley said why.",
            prior,
        }
    }

    /// `n` words of filler prose.
    pub fn manuscript_text(n: usize) -> String {
        const WORDS: [&str; 8] = ["the", "orchard", "kept", "its", "secrets", "through", "long", "winters"];
        (0..n)
            .map(|i| WORDS[i % WORDS.len()])
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// A full pipeline context over in-memory backends, plus handles to the
    /// doubles behind it.
    pub struct TestContext {
        pub ctx: Arc<PipelineContext>,
        pub clock: Arc<ManualClock>,
        pub objects: Arc<MemoryObjectStore>,
        pub llm: Arc<MockLlmClient>,
    }

    impl Deref for TestContext {
        type Target = PipelineContext;

        fn deref(&self) -> &Self::Target {
            &self.ctx
        }
    }

    pub fn context() -> TestContext {
        context_with(test_config())
    }

    pub fn context_with(config: Config) -> TestContext {
        let (db, clock) = database();
        let objects = Arc::new(MemoryObjectStore::new());
        let llm = Arc::new(MockLlmClient::new());
        let ctx = PipelineContext::builder(config)
            .with_clock(clock.clone())
            .with_database(db)
            .with_object_store(objects.clone())
            .with_llm(llm.clone())
            .build()
            .expect("pipeline context");
        TestContext {
            ctx: Arc::new(ctx),
            clock,
            objects,
            llm,
        }
    }

    /// Insert a draft manuscript row (no stored object).
    pub fn insert_manuscript(ctx: &PipelineContext, id: &str, user_id: &str) -> Manuscript {
        let m = manuscript(id, user_id, ctx.clock.now());
        ctx.manuscripts.insert(&m).expect("insert manuscript");
        m
    }

    /// Insert a draft manuscript and store `words` words of text under its key.
    pub async fn seed_manuscript(
        ctx: &PipelineContext,
        id: &str,
        user_id: &str,
        words: usize,
    ) -> Manuscript {
        let mut m = manuscript(id, user_id, ctx.clock.now());
        let text = manuscript_text(words);
        m.word_count = words as u64;
        m.file_size = text.len() as u64;
        ctx.objects
            .put(&m.storage_key, text.into_bytes(), ObjectMeta::new("text/plain"))
            .await
            .expect("store manuscript");
        ctx.manuscripts.insert(&m).expect("insert manuscript");
        m
    }

    /// Record usage until `user_id` has nothing left on their plan.
    pub fn exhaust_quota(ctx: &PipelineContext, user_id: &str) {
        let quota = ctx.usage.quota(user_id).expect("quota");
        for i in quota.used_this_period..quota.plan_limit {
            let event = ctx.usage.event_for(
                &quota,
                user_id,
                "seed",
                &format!("seed-report-{i}"),
                AnalysisKind::Full,
            );
            ctx.db
                .transaction(|tx| ctx.usage.record_in(tx, &event))
                .expect("record usage");
        }
    }
}
