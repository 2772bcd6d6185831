use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info, warn};

use super::{
    artifact_key, ArtifactBody, ArtifactCache, ArtifactError, ArtifactIndex, ArtifactKind,
    ArtifactRecord, ArtifactSummary,
};
use crate::clock::Clock;
use crate::db::Database;
use crate::llm::LlmUsage;
use crate::manuscript::Manuscript;
use crate::storage::{ObjectMeta, ObjectStore};

const JSON: &str = "application/json";

/// One artifact body ready to publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub user_id: String,
    pub manuscript_id: String,
    pub manuscript_key: String,
    pub kind: ArtifactKind,
    /// Producing job; `None` for human edits.
    pub report_id: Option<String>,
    pub content_type: String,
    pub body: Vec<u8>,
    pub model: String,
    pub usage: LlmUsage,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published { version: u32, storage_key: String },
    /// The index row already carries this job's report id.
    AlreadyPublished { version: u32 },
}

impl PublishOutcome {
    pub fn version(&self) -> u32 {
        match self {
            PublishOutcome::Published { version, .. } | PublishOutcome::AlreadyPublished { version } => {
                *version
            }
        }
    }
}

/// Artifact bodies in the object store, indexed in the relational store,
/// fronted by [`ArtifactCache`].
#[derive(Clone)]
pub struct ArtifactStore {
    db: Arc<Database>,
    objects: Arc<dyn ObjectStore>,
    index: ArtifactIndex,
    cache: ArtifactCache,
    clock: Arc<dyn Clock>,
}

impl ArtifactStore {
    pub fn new(
        db: Arc<Database>,
        objects: Arc<dyn ObjectStore>,
        cache: ArtifactCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index: ArtifactIndex::new(db.clone()),
            db,
            objects,
            cache,
            clock,
        }
    }

    pub fn index(&self) -> &ArtifactIndex {
        &self.index
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Write the body, then upsert the index row, then invalidate.
    ///
    /// A reader never sees an index row whose object is missing.
    pub async fn publish(&self, req: PublishRequest) -> Result<PublishOutcome, ArtifactError> {
        if let Some(report_id) = req.report_id.as_deref() {
            if let Some(existing) = self.index.get(&req.manuscript_id, &req.kind)? {
                if existing.report_id.as_deref() == Some(report_id) {
                    debug!(
                        manuscript_id = %req.manuscript_id,
                        kind = %req.kind,
                        report_id,
                        "Artifact already published by this job"
                    );
                    return Ok(PublishOutcome::AlreadyPublished {
                        version: existing.version,
                    });
                }
            }
        }

        let storage_key = artifact_key(&req.manuscript_key, &req.kind);
        let size_bytes = req.body.len() as u64;
        let mut meta = ObjectMeta::new(req.content_type.as_str())
            .with("manuscript-id", req.manuscript_id.as_str())
            .with("kind", req.kind.as_str());
        if let Some(report_id) = &req.report_id {
            meta = meta.with("report-id", report_id.as_str());
        }
        self.objects.put(&storage_key, req.body, meta).await?;

        let record = ArtifactRecord {
            manuscript_id: req.manuscript_id.clone(),
            kind: req.kind.clone(),
            version: 0,
            report_id: req.report_id.clone(),
            storage_key: storage_key.clone(),
            content_type: req.content_type,
            size_bytes,
            model: req.model,
            input_tokens: req.usage.input_tokens,
            output_tokens: req.usage.output_tokens,
            cost_usd: req.cost_usd,
            created_at: self.clock.now(),
        };
        let version = self.db.transaction(|tx| self.index.upsert_in(tx, &record))?;

        self.cache
            .invalidate_artifact(&req.user_id, &req.manuscript_id, &req.kind.as_str())
            .await;

        info!(
            manuscript_id = %req.manuscript_id,
            kind = %req.kind,
            version,
            size_bytes,
            "Published artifact"
        );
        Ok(PublishOutcome::Published {
            version,
            storage_key,
        })
    }

    /// Body of the latest version, or `None` if the kind was never produced.
    pub async fn get_artifact(
        &self,
        user_id: &str,
        manuscript_id: &str,
        kind: &ArtifactKind,
    ) -> Result<Option<Arc<ArtifactBody>>, ArtifactError> {
        let kind_name = kind.as_str();
        self.cache
            .artifact_body(user_id, manuscript_id, &kind_name, self.load_body(manuscript_id, kind))
            .await
    }

    async fn load_body(
        &self,
        manuscript_id: &str,
        kind: &ArtifactKind,
    ) -> Result<Option<Arc<ArtifactBody>>, ArtifactError> {
        let Some(record) = self.index.get(manuscript_id, kind)? else {
            return Ok(None);
        };
        match self.objects.get(&record.storage_key).await? {
            Some(object) => Ok(Some(Arc::new(ArtifactBody {
                kind: record.kind,
                version: record.version,
                content_type: object.meta.content_type.unwrap_or(record.content_type),
                bytes: object.bytes,
            }))),
            None => {
                warn!(
                    manuscript_id,
                    storage_key = %record.storage_key,
                    "Indexed artifact has no stored body"
                );
                Ok(None)
            }
        }
    }

    /// Every produced kind with its index metadata.
    pub async fn list_kinds(
        &self,
        user_id: &str,
        manuscript_id: &str,
    ) -> Result<BTreeMap<ArtifactKind, ArtifactSummary>, ArtifactError> {
        let list = self
            .cache
            .artifact_list(user_id, manuscript_id, self.load_summaries(manuscript_id))
            .await?
            .unwrap_or_default();

        Ok(list.iter().map(|s| (s.kind.clone(), s.clone())).collect())
    }

    async fn load_summaries(
        &self,
        manuscript_id: &str,
    ) -> Result<Option<Arc<Vec<ArtifactSummary>>>, ArtifactError> {
        let records = self.index.list(manuscript_id)?;
        Ok(Some(Arc::new(
            records.into_iter().map(ArtifactSummary::from).collect(),
        )))
    }

    /// Drop cached entries for the given kinds, or for the whole manuscript
    /// when `kinds` is empty.
    pub async fn invalidate(&self, user_id: &str, manuscript_id: &str, kinds: &[ArtifactKind]) {
        if kinds.is_empty() {
            self.cache.invalidate_manuscript(user_id, manuscript_id).await;
            return;
        }
        for kind in kinds {
            self.cache
                .invalidate_artifact(user_id, manuscript_id, &kind.as_str())
                .await;
        }
    }

    /// Publish an author-supplied chapter revision.
    ///
    /// JSON bodies are stored as-is; anything else is wrapped in a base64
    /// envelope.
    pub async fn put_human_edit(
        &self,
        manuscript: &Manuscript,
        chapter: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<PublishOutcome, ArtifactError> {
        let kind = ArtifactKind::human_edit(chapter)
            .map_err(|e| ArtifactError::InvalidBody(e.to_string()))?;

        let stored = if is_json(content_type) {
            serde_json::from_slice::<serde_json::Value>(&body)
                .map_err(|e| ArtifactError::InvalidBody(format!("body is not valid JSON: {e}")))?;
            body
        } else {
            let envelope = serde_json::json!({
                "encoding": "base64",
                "contentType": content_type,
                "data": STANDARD.encode(&body),
            });
            serde_json::to_vec(&envelope).map_err(|e| ArtifactError::InvalidBody(e.to_string()))?
        };

        self.publish(PublishRequest {
            user_id: manuscript.user_id.clone(),
            manuscript_id: manuscript.id.clone(),
            manuscript_key: manuscript.storage_key.clone(),
            kind,
            report_id: None,
            content_type: JSON.to_string(),
            body: stored,
            model: "human".to_string(),
            usage: LlmUsage::default(),
            cost_usd: 0.0,
        })
        .await
    }

    /// Remove every artifact body of a manuscript. Index rows go with the
    /// manuscript row through the cascade.
    pub async fn delete_for_manuscript(
        &self,
        user_id: &str,
        manuscript_id: &str,
    ) -> Result<usize, ArtifactError> {
        let records = self.index.list(manuscript_id)?;
        let mut removed = 0;
        for record in &records {
            if self.objects.delete(&record.storage_key).await? {
                removed += 1;
            }
        }
        self.cache.invalidate_manuscript(user_id, manuscript_id).await;
        Ok(removed)
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == JSON || essence.ends_with("+json")
}
