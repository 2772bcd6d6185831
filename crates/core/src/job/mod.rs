//! Pipeline run records.
//!
//! A job is one pipeline run over one manuscript, identified by its report
//! id. At most one job per manuscript is active at a time.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::ArtifactKind;
use crate::clock::Clock;
use crate::db::{get_json, get_ts, ts, Database, DbError, FromRow, Tx};
use crate::manuscript::ManuscriptState;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Manuscript {0} already has an active job")]
    ActiveJobExists(String),

    #[error("Job not found: {0}")]
    NotFound(String),
}

impl From<DbError> for JobError {
    fn from(e: DbError) -> Self {
        JobError::Database(e.to_string())
    }
}

/// Which chain of stages a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Developmental, line and copy editing.
    Analysis,
    /// Marketing assets followed by the audiobook kit.
    Assets,
    /// Audiobook kit only.
    Audiobook,
}

impl Pipeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::Analysis => "analysis",
            Pipeline::Assets => "assets",
            Pipeline::Audiobook => "audiobook",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(Pipeline::Analysis),
            "assets" => Ok(Pipeline::Assets),
            "audiobook" => Ok(Pipeline::Audiobook),
            other => Err(format!("unknown pipeline: {}", other)),
        }
    }
}

/// Allocate a report id: UTC timestamp plus an 8-char lowercase alphanumeric
/// suffix. Short, URL-safe and roughly time-ordered.
pub fn new_report_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub report_id: String,
    pub manuscript_id: String,
    pub user_id: String,
    pub pipeline: Pipeline,
    pub genre: String,
    pub style_guide: Option<String>,
    /// Restricts the run to these kinds; `None` runs the whole pipeline.
    pub kinds: Option<Vec<ArtifactKind>>,
    pub attempt: u32,
    pub parent_report_id: Option<String>,
    /// Manuscript state before this job started; rollback target on failure.
    pub prior_state: ManuscriptState,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub report_id: String,
    pub manuscript_id: String,
    pub user_id: String,
    pub pipeline: Pipeline,
    pub genre: String,
    pub style_guide: Option<String>,
    pub kinds: Option<Vec<ArtifactKind>>,
    pub parent_report_id: Option<String>,
    pub prior_state: ManuscriptState,
}

impl FromRow for Job {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let pipeline: String = row.get(3)?;
        let prior_state: String = row.get(9)?;
        let kinds: Option<String> = row.get(6)?;
        Ok(Job {
            report_id: row.get(0)?,
            manuscript_id: row.get(1)?,
            user_id: row.get(2)?,
            pipeline: pipeline.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
            })?,
            genre: row.get(4)?,
            style_guide: row.get(5)?,
            kinds: match kinds {
                Some(_) => Some(get_json(row, 6)?),
                None => None,
            },
            attempt: row.get(7)?,
            parent_report_id: row.get(8)?,
            prior_state: prior_state.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
            })?,
            active: row.get(10)?,
            created_at: get_ts(row, 11)?,
            updated_at: get_ts(row, 12)?,
        })
    }
}

const JOB_COLUMNS: &str = "report_id, manuscript_id, user_id, pipeline, genre, style_guide, kinds, \
     attempt, parent_report_id, prior_state, active, created_at, updated_at";

/// Repository over the `jobs` table.
#[derive(Clone)]
pub struct JobStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl JobStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Insert an active job inside `tx`. Fails with `ActiveJobExists` when
    /// the manuscript already has one.
    pub fn create_in(&self, tx: &Tx<'_>, job: &NewJob) -> Result<Job, JobError> {
        let now = self.clock.now();
        let kinds_json = match &job.kinds {
            Some(kinds) => Some(
                serde_json::to_string(kinds).map_err(|e| JobError::Database(e.to_string()))?,
            ),
            None => None,
        };

        let inserted = tx
            .prepare(format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 1, ?, ?)"
            ))
            .bind(job.report_id.as_str())
            .bind(job.manuscript_id.as_str())
            .bind(job.user_id.as_str())
            .bind(job.pipeline.as_str())
            .bind(job.genre.as_str())
            .bind(job.style_guide.as_deref())
            .bind(kinds_json)
            .bind(job.parent_report_id.as_deref())
            .bind(job.prior_state.as_str())
            .bind(ts(now))
            .bind(ts(now))
            .run();

        match inserted {
            Ok(_) => {}
            Err(DbError::Constraint(_)) => {
                return Err(JobError::ActiveJobExists(job.manuscript_id.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Job {
            report_id: job.report_id.clone(),
            manuscript_id: job.manuscript_id.clone(),
            user_id: job.user_id.clone(),
            pipeline: job.pipeline,
            genre: job.genre.clone(),
            style_guide: job.style_guide.clone(),
            kinds: job.kinds.clone(),
            attempt: 0,
            parent_report_id: job.parent_report_id.clone(),
            prior_state: job.prior_state,
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, report_id: &str) -> Result<Option<Job>, JobError> {
        Ok(self
            .db
            .prepare(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE report_id = ?"))
            .bind(report_id)
            .first()?)
    }

    pub fn active_for_manuscript(&self, manuscript_id: &str) -> Result<Option<Job>, JobError> {
        Ok(self
            .db
            .prepare(format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE manuscript_id = ? AND active = 1"
            ))
            .bind(manuscript_id)
            .first()?)
    }

    /// Record the delivery attempt currently running.
    pub fn record_attempt(&self, report_id: &str, attempt: u32) -> Result<(), JobError> {
        let result = self
            .db
            .prepare("UPDATE jobs SET attempt = ?, updated_at = ? WHERE report_id = ?")
            .bind(attempt)
            .bind(ts(self.clock.now()))
            .bind(report_id)
            .run()?;
        if result.changes == 0 {
            return Err(JobError::NotFound(report_id.to_string()));
        }
        Ok(())
    }

    /// Mark the job inactive so the manuscript can accept a new one.
    pub fn finish(&self, report_id: &str) -> Result<(), JobError> {
        self.db
            .prepare("UPDATE jobs SET active = 0, updated_at = ? WHERE report_id = ?")
            .bind(ts(self.clock.now()))
            .bind(report_id)
            .run()?;
        Ok(())
    }

    /// Transactional variant of [`JobStore::finish`].
    pub fn finish_in(&self, tx: &Tx<'_>, report_id: &str) -> Result<(), JobError> {
        tx.prepare("UPDATE jobs SET active = 0, updated_at = ? WHERE report_id = ?")
            .bind(ts(self.clock.now()))
            .bind(report_id)
            .run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn new_job(report_id: &str, manuscript_id: &str) -> NewJob {
        NewJob {
            report_id: report_id.to_string(),
            manuscript_id: manuscript_id.to_string(),
            user_id: "user-1".to_string(),
            pipeline: Pipeline::Analysis,
            genre: "fantasy".to_string(),
            style_guide: None,
            kinds: None,
            parent_report_id: None,
            prior_state: ManuscriptState::Draft,
        }
    }

    #[test]
    fn test_report_id_format() {
        let now = fixtures::base_time();
        let id = new_report_id(now);
        let (stamp, suffix) = id.split_once('-').unwrap();
        assert_eq!(stamp, "20260301090000");
        assert_eq!(suffix.len(), 8);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_create_and_get() {
        let (db, clock) = fixtures::database_with_manuscript("m1");
        let store = JobStore::new(db.clone(), clock);

        let mut spec = new_job("r1", "m1");
        spec.kinds = Some(vec![ArtifactKind::LineEditing]);
        db.transaction(|tx| store.create_in(tx, &spec)).unwrap();

        let job = store.get("r1").unwrap().unwrap();
        assert_eq!(job.pipeline, Pipeline::Analysis);
        assert_eq!(job.kinds, Some(vec![ArtifactKind::LineEditing]));
        assert!(job.active);
        assert_eq!(job.attempt, 0);
    }

    #[test]
    fn test_one_active_job_per_manuscript() {
        let (db, clock) = fixtures::database_with_manuscript("m1");
        let store = JobStore::new(db.clone(), clock);

        db.transaction(|tx| store.create_in(tx, &new_job("r1", "m1")))
            .unwrap();
        let err = db
            .transaction(|tx| store.create_in(tx, &new_job("r2", "m1")))
            .unwrap_err();
        assert!(matches!(err, JobError::ActiveJobExists(_)));

        store.finish("r1").unwrap();
        db.transaction(|tx| store.create_in(tx, &new_job("r2", "m1")))
            .unwrap();
        assert_eq!(
            store.active_for_manuscript("m1").unwrap().unwrap().report_id,
            "r2"
        );
    }

    #[test]
    fn test_record_attempt() {
        let (db, clock) = fixtures::database_with_manuscript("m1");
        let store = JobStore::new(db.clone(), clock);
        db.transaction(|tx| store.create_in(tx, &new_job("r1", "m1")))
            .unwrap();

        store.record_attempt("r1", 3).unwrap();
        assert_eq!(store.get("r1").unwrap().unwrap().attempt, 3);
        assert!(matches!(
            store.record_attempt("missing", 1),
            Err(JobError::NotFound(_))
        ));
    }
}
