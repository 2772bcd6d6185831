use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::{ArtifactError, ArtifactKind};
use crate::db::{get_ts, ts, Database, FromRow, Tx};

/// One row of `manuscript_artifacts`: the latest version of a kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub manuscript_id: String,
    pub kind: ArtifactKind,
    pub version: u32,
    /// Job that produced this version; `None` for human edits.
    pub report_id: Option<String>,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl FromRow for ArtifactRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(1)?;
        Ok(ArtifactRecord {
            manuscript_id: row.get(0)?,
            kind: kind.parse().map_err(|e: super::UnknownKind| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?,
            version: row.get(2)?,
            report_id: row.get(3)?,
            storage_key: row.get(4)?,
            content_type: row.get(5)?,
            size_bytes: row.get(6)?,
            model: row.get(7)?,
            input_tokens: row.get(8)?,
            output_tokens: row.get(9)?,
            cost_usd: row.get(10)?,
            created_at: get_ts(row, 11)?,
        })
    }
}

const COLUMNS: &str = "manuscript_id, kind, version, report_id, storage_key, content_type, \
     size_bytes, model, input_tokens, output_tokens, cost_usd, created_at";

/// Repository over `manuscript_artifacts`. Authoritative for which stages
/// are done.
#[derive(Clone)]
pub struct ArtifactIndex {
    db: Arc<Database>,
}

impl ArtifactIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(
        &self,
        manuscript_id: &str,
        kind: &ArtifactKind,
    ) -> Result<Option<ArtifactRecord>, ArtifactError> {
        Ok(self
            .db
            .prepare(format!(
                "SELECT {COLUMNS} FROM manuscript_artifacts WHERE manuscript_id = ? AND kind = ?"
            ))
            .bind(manuscript_id)
            .bind(kind.as_str().into_owned())
            .first()?)
    }

    pub fn list(&self, manuscript_id: &str) -> Result<Vec<ArtifactRecord>, ArtifactError> {
        Ok(self
            .db
            .prepare(format!(
                "SELECT {COLUMNS} FROM manuscript_artifacts WHERE manuscript_id = ? ORDER BY kind"
            ))
            .bind(manuscript_id)
            .all()?)
    }

    /// Whether `report_id` already published `kind`.
    pub fn published_by(
        &self,
        manuscript_id: &str,
        kind: &ArtifactKind,
        report_id: &str,
    ) -> Result<bool, ArtifactError> {
        Ok(self
            .get(manuscript_id, kind)?
            .is_some_and(|r| r.report_id.as_deref() == Some(report_id)))
    }

    /// Insert version 1 or bump the existing version. Returns the new version.
    pub fn upsert_in(&self, tx: &Tx<'_>, record: &ArtifactRecord) -> Result<u32, ArtifactError> {
        let kind = record.kind.as_str().into_owned();
        tx.prepare(format!(
            "INSERT INTO manuscript_artifacts ({COLUMNS}) VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(manuscript_id, kind) DO UPDATE SET \
             version = manuscript_artifacts.version + 1, report_id = excluded.report_id, \
             storage_key = excluded.storage_key, content_type = excluded.content_type, \
             size_bytes = excluded.size_bytes, model = excluded.model, \
             input_tokens = excluded.input_tokens, output_tokens = excluded.output_tokens, \
             cost_usd = excluded.cost_usd, created_at = excluded.created_at"
        ))
        .bind(record.manuscript_id.as_str())
        .bind(kind.clone())
        .bind(record.report_id.as_deref())
        .bind(record.storage_key.as_str())
        .bind(record.content_type.as_str())
        .bind(record.size_bytes)
        .bind(record.model.as_str())
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.cost_usd)
        .bind(ts(record.created_at))
        .run()?;

        let version: Option<u32> = tx
            .prepare("SELECT version FROM manuscript_artifacts WHERE manuscript_id = ? AND kind = ?")
            .bind(record.manuscript_id.as_str())
            .bind(kind)
            .scalar()?;
        version.ok_or_else(|| ArtifactError::Database("artifact row vanished after upsert".into()))
    }

    /// Total metered cost of the artifacts a job produced.
    pub fn cost_for_report(&self, manuscript_id: &str, report_id: &str) -> Result<f64, ArtifactError> {
        let total: Option<f64> = self
            .db
            .prepare(
                "SELECT COALESCE(SUM(cost_usd), 0.0) FROM manuscript_artifacts \
                 WHERE manuscript_id = ? AND report_id = ?",
            )
            .bind(manuscript_id)
            .bind(report_id)
            .scalar()?;
        Ok(total.unwrap_or(0.0))
    }
}
