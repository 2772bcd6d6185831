//! Generated artifacts: kinds, the relational index, the object-store
//! bodies, and the read-through cache in front of both.

mod cache;
mod index;
mod kind;
mod store;

pub use cache::ArtifactCache;
pub use index::{ArtifactIndex, ArtifactRecord};
pub use kind::{ArtifactKind, UnknownKind, AUDIOBOOK_KINDS, EDITORIAL_KINDS, MARKETING_KINDS};
pub use store::{ArtifactStore, PublishOutcome, PublishRequest};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid artifact body: {0}")]
    InvalidBody(String),
}

impl From<DbError> for ArtifactError {
    fn from(e: DbError) -> Self {
        ArtifactError::Database(e.to_string())
    }
}

/// Stored body of one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBody {
    pub kind: ArtifactKind,
    pub version: u32,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Index entry as exposed to callers (no storage key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub kind: ArtifactKind,
    pub version: u32,
    pub report_id: Option<String>,
    pub content_type: String,
    pub size_bytes: u64,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl From<ArtifactRecord> for ArtifactSummary {
    fn from(r: ArtifactRecord) -> Self {
        Self {
            kind: r.kind,
            version: r.version,
            report_id: r.report_id,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            model: r.model,
            input_tokens: r.input_tokens,
            output_tokens: r.output_tokens,
            cost_usd: r.cost_usd,
            created_at: r.created_at,
        }
    }
}

/// Object key for an artifact body: `{manuscriptKey}-{kind}.json`.
pub fn artifact_key(manuscript_key: &str, kind: &ArtifactKind) -> String {
    format!("{}-{}.json", manuscript_key, kind.key_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_key_uses_kind_suffix() {
        assert_eq!(
            artifact_key("user-1/m1/1772355600_book.txt", &ArtifactKind::Developmental),
            "user-1/m1/1772355600_book.txt-developmental.json"
        );
        let edit = ArtifactKind::human_edit("ch-3").unwrap();
        assert_eq!(
            artifact_key("user-1/m1/1772355600_book.txt", &edit),
            "user-1/m1/1772355600_book.txt-human-edit-ch-3.json"
        );
    }
}
