//! Manuscript records and their lifecycle.

mod cursor;
mod state;

pub use cursor::{Cursor, InvalidCursor};
pub use state::{IllegalTransition, ManuscriptState};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::db::{get_ts, ts, Database, DbError, FromRow, Tx};

#[derive(Debug, Error)]
pub enum ManuscriptError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Manuscript not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("Manuscript {0} changed concurrently")]
    Conflict(String),
}

impl From<DbError> for ManuscriptError {
    fn from(e: DbError) -> Self {
        ManuscriptError::Database(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manuscript {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub genre: String,
    pub style_guide: Option<String>,
    pub word_count: u64,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub content_hash: String,
    pub storage_key: String,
    pub state: ManuscriptState,
    pub flagged_for_review: bool,
    /// Earlier upload by the same owner with identical bytes. Advisory only.
    pub duplicate_of: Option<String>,
    pub latest_report_id: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Manuscript {
    pub fn cursor(&self) -> Cursor {
        Cursor {
            uploaded_at: self.uploaded_at,
            id: self.id.clone(),
        }
    }
}

impl FromRow for Manuscript {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let state: String = row.get(11)?;
        Ok(Manuscript {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            genre: row.get(3)?,
            style_guide: row.get(4)?,
            word_count: row.get(5)?,
            file_name: row.get(6)?,
            file_type: row.get(7)?,
            file_size: row.get(8)?,
            content_hash: row.get(9)?,
            storage_key: row.get(10)?,
            state: state.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, e.into())
            })?,
            flagged_for_review: row.get(12)?,
            duplicate_of: row.get(13)?,
            latest_report_id: row.get(14)?,
            uploaded_at: get_ts(row, 15)?,
            updated_at: get_ts(row, 16)?,
        })
    }
}

const COLUMNS: &str = "id, user_id, title, genre, style_guide, word_count, file_name, file_type, \
     file_size, content_hash, storage_key, state, flagged_for_review, duplicate_of, \
     latest_report_id, uploaded_at, updated_at";

/// One page of a manuscript listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManuscriptPage {
    pub items: Vec<Manuscript>,
    pub next_cursor: Option<String>,
}

/// Repository over the `manuscripts` table.
#[derive(Clone)]
pub struct ManuscriptStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl ManuscriptStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn insert(&self, m: &Manuscript) -> Result<(), ManuscriptError> {
        self.db.transaction(|tx| self.insert_in(tx, m))
    }

    pub fn insert_in(&self, tx: &Tx<'_>, m: &Manuscript) -> Result<(), ManuscriptError> {
        tx.prepare(format!(
            "INSERT INTO manuscripts ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(m.id.as_str())
        .bind(m.user_id.as_str())
        .bind(m.title.as_str())
        .bind(m.genre.as_str())
        .bind(m.style_guide.as_deref())
        .bind(m.word_count)
        .bind(m.file_name.as_str())
        .bind(m.file_type.as_str())
        .bind(m.file_size)
        .bind(m.content_hash.as_str())
        .bind(m.storage_key.as_str())
        .bind(m.state.as_str())
        .bind(m.flagged_for_review)
        .bind(m.duplicate_of.as_deref())
        .bind(m.latest_report_id.as_deref())
        .bind(ts(m.uploaded_at))
        .bind(ts(m.updated_at))
        .run()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Manuscript>, ManuscriptError> {
        Ok(self
            .db
            .prepare(format!("SELECT {COLUMNS} FROM manuscripts WHERE id = ?"))
            .bind(id)
            .first()?)
    }

    /// The manuscript if it exists and belongs to `user_id`.
    pub fn get_owned(&self, user_id: &str, id: &str) -> Result<Option<Manuscript>, ManuscriptError> {
        Ok(self
            .db
            .prepare(format!(
                "SELECT {COLUMNS} FROM manuscripts WHERE id = ? AND user_id = ?"
            ))
            .bind(id)
            .bind(user_id)
            .first()?)
    }

    /// Newest first, keyset-paginated by `(uploaded_at, id)`.
    pub fn list(
        &self,
        user_id: &str,
        after: Option<&Cursor>,
        limit: usize,
    ) -> Result<ManuscriptPage, ManuscriptError> {
        let limit = limit.max(1);
        // Fetch one extra row to learn whether another page exists.
        let fetch = (limit + 1) as i64;

        let mut items: Vec<Manuscript> = match after {
            Some(cursor) => self
                .db
                .prepare(format!(
                    "SELECT {COLUMNS} FROM manuscripts WHERE user_id = ? \
                     AND (uploaded_at < ? OR (uploaded_at = ? AND id < ?)) \
                     ORDER BY uploaded_at DESC, id DESC LIMIT ?"
                ))
                .bind(user_id)
                .bind(ts(cursor.uploaded_at))
                .bind(ts(cursor.uploaded_at))
                .bind(cursor.id.as_str())
                .bind(fetch)
                .all()?,
            None => self
                .db
                .prepare(format!(
                    "SELECT {COLUMNS} FROM manuscripts WHERE user_id = ? \
                     ORDER BY uploaded_at DESC, id DESC LIMIT ?"
                ))
                .bind(user_id)
                .bind(fetch)
                .all()?,
        };

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|m| m.cursor().encode())
        } else {
            None
        };

        Ok(ManuscriptPage { items, next_cursor })
    }

    /// Oldest other manuscript of `user_id` with the same content hash.
    pub fn find_duplicate(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<String>, ManuscriptError> {
        Ok(self
            .db
            .prepare(
                "SELECT id FROM manuscripts WHERE user_id = ? AND content_hash = ? \
                 ORDER BY uploaded_at ASC, id ASC LIMIT 1",
            )
            .bind(user_id)
            .bind(content_hash)
            .scalar()?)
    }

    /// Move the manuscript to `to`, returning the previous state.
    pub fn set_state(
        &self,
        id: &str,
        to: ManuscriptState,
    ) -> Result<ManuscriptState, ManuscriptError> {
        self.db.transaction(|tx| self.set_state_in(tx, id, to))
    }

    /// Transactional state change; the update is guarded by the state it read.
    pub fn set_state_in(
        &self,
        tx: &Tx<'_>,
        id: &str,
        to: ManuscriptState,
    ) -> Result<ManuscriptState, ManuscriptError> {
        let current: String = tx
            .prepare("SELECT state FROM manuscripts WHERE id = ?")
            .bind(id)
            .scalar()?
            .ok_or_else(|| ManuscriptError::NotFound(id.to_string()))?;
        let from: ManuscriptState = current
            .parse()
            .map_err(ManuscriptError::Database)?;

        from.transition(to)?;
        if from == to {
            return Ok(from);
        }

        let result = tx
            .prepare("UPDATE manuscripts SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
            .bind(to.as_str())
            .bind(ts(self.clock.now()))
            .bind(id)
            .bind(from.as_str())
            .run()?;
        if result.changes == 0 {
            return Err(ManuscriptError::Conflict(id.to_string()));
        }

        tracing::debug!(manuscript_id = id, from = %from, to = %to, "Manuscript state changed");
        Ok(from)
    }

    pub fn set_latest_report_in(
        &self,
        tx: &Tx<'_>,
        id: &str,
        report_id: &str,
    ) -> Result<(), ManuscriptError> {
        tx.prepare("UPDATE manuscripts SET latest_report_id = ?, updated_at = ? WHERE id = ?")
            .bind(report_id)
            .bind(ts(self.clock.now()))
            .bind(id)
            .run()?;
        Ok(())
    }

    /// Delete the row; artifact index rows and jobs cascade.
    pub fn delete(&self, id: &str) -> Result<bool, ManuscriptError> {
        let result = self
            .db
            .prepare("DELETE FROM manuscripts WHERE id = ?")
            .bind(id)
            .run()?;
        Ok(result.changes > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing::fixtures;

    fn store() -> (ManuscriptStore, Arc<crate::clock::ManualClock>) {
        let (db, clock) = fixtures::database();
        (ManuscriptStore::new(db, clock.clone()), clock)
    }

    #[test]
    fn test_insert_and_get_owned() {
        let (store, _) = store();
        let m = fixtures::manuscript("m1", "user-1", fixtures::base_time());
        store.insert(&m).unwrap();

        assert_eq!(store.get("m1").unwrap().unwrap(), m);
        assert!(store.get_owned("user-1", "m1").unwrap().is_some());
        assert!(store.get_owned("user-2", "m1").unwrap().is_none());
    }

    #[test]
    fn test_list_pages_newest_first() {
        let (store, _) = store();
        let base = fixtures::base_time();
        for i in 0..5 {
            let m = fixtures::manuscript(&format!("m{}", i), "user-1", base + Duration::minutes(i));
            store.insert(&m).unwrap();
        }
        store
            .insert(&fixtures::manuscript("other", "user-2", base))
            .unwrap();

        let first = store.list("user-1", None, 2).unwrap();
        let ids: Vec<_> = first.items.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m4", "m3"]);
        let cursor = Cursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();

        let second = store.list("user-1", Some(&cursor), 2).unwrap();
        let ids: Vec<_> = second.items.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);

        let cursor = Cursor::decode(second.next_cursor.as_deref().unwrap()).unwrap();
        let last = store.list("user-1", Some(&cursor), 2).unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_same_timestamp_ties_break_on_id() {
        let (store, _) = store();
        let at = fixtures::base_time();
        for id in ["a", "b", "c"] {
            store.insert(&fixtures::manuscript(id, "user-1", at)).unwrap();
        }
        let first = store.list("user-1", None, 1).unwrap();
        assert_eq!(first.items[0].id, "c");
        let cursor = Cursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();
        let rest = store.list("user-1", Some(&cursor), 10).unwrap();
        let ids: Vec<_> = rest.items.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_state_changes_go_through_transition() {
        let (store, _) = store();
        store
            .insert(&fixtures::manuscript("m1", "user-1", fixtures::base_time()))
            .unwrap();

        assert_eq!(
            store.set_state("m1", ManuscriptState::Queued).unwrap(),
            ManuscriptState::Draft
        );
        let err = store.set_state("m1", ManuscriptState::Analyzed).unwrap_err();
        assert!(matches!(err, ManuscriptError::IllegalTransition(_)));
        assert_eq!(
            store.get("m1").unwrap().unwrap().state,
            ManuscriptState::Queued
        );

        assert!(matches!(
            store.set_state("missing", ManuscriptState::Queued),
            Err(ManuscriptError::NotFound(_))
        ));
    }

    #[test]
    fn test_find_duplicate_returns_oldest() {
        let (store, _) = store();
        let base = fixtures::base_time();
        let mut first = fixtures::manuscript("m1", "user-1", base);
        first.content_hash = "h".to_string();
        let mut second = fixtures::manuscript("m2", "user-1", base + Duration::minutes(1));
        second.content_hash = "h".to_string();
        store.insert(&first).unwrap();
        store.insert(&second).unwrap();

        assert_eq!(
            store.find_duplicate("user-1", "h").unwrap().as_deref(),
            Some("m1")
        );
        assert!(store.find_duplicate("user-2", "h").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let (store, _) = store();
        store
            .insert(&fixtures::manuscript("m1", "user-1", fixtures::base_time()))
            .unwrap();
        assert!(store.delete("m1").unwrap());
        assert!(!store.delete("m1").unwrap());
    }
}
