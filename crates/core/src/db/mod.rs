//! Relational store adapter.
//!
//! A thin statement builder over a single SQLite connection:
//! `db.prepare(sql).bind(a).bind(b).run() / first() / all()`.
//! Multi-statement writes go through [`Database::transaction`], which hands
//! the closure a [`Tx`] exposing the same builder.

mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, Type};
use rusqlite::{Connection, ErrorCode, Row, ToSql};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                DbError::Constraint(e.to_string())
            }
            other => DbError::Database(other.to_string()),
        }
    }
}

/// Maps one result row into a value.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub changes: usize,
    pub last_row_id: i64,
}

/// SQLite-backed relational store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DbError::Database(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Self::from_connection(conn)
    }

    /// In-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Start building a statement executed on its own.
    pub fn prepare(&self, sql: impl Into<String>) -> Statement<'_> {
        Statement {
            target: Target::Database(self),
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Run `f` inside one transaction; any error rolls everything back.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(DbError::from)?;
        let out = f(&Tx { conn: &tx })?;
        tx.commit().map_err(DbError::from)?;
        Ok(out)
    }
}

/// Open transaction scope handed to [`Database::transaction`].
pub struct Tx<'c> {
    conn: &'c Connection,
}

impl<'c> Tx<'c> {
    pub fn prepare(&self, sql: impl Into<String>) -> Statement<'c> {
        Statement {
            target: Target::Connection(self.conn),
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

enum Target<'a> {
    Database(&'a Database),
    Connection(&'a Connection),
}

/// A statement with its bound parameters, executed by `run`, `first`, `all` or `scalar`.
pub struct Statement<'a> {
    target: Target<'a>,
    sql: String,
    params: Vec<Box<dyn ToSql + 'a>>,
}

impl<'a> Statement<'a> {
    /// Bind the next positional parameter.
    pub fn bind(mut self, value: impl ToSql + 'a) -> Self {
        self.params.push(Box::new(value));
        self
    }

    /// Bind every parameter of an already-built list.
    pub fn bind_all(mut self, values: Vec<Box<dyn ToSql + 'a>>) -> Self {
        self.params.extend(values);
        self
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection, &[&dyn ToSql]) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let refs: Vec<&dyn ToSql> = self.params.iter().map(|p| p.as_ref()).collect();
        match self.target {
            Target::Database(db) => {
                let conn = db.lock()?;
                f(&conn, refs.as_slice())
            }
            Target::Connection(conn) => f(conn, refs.as_slice()),
        }
    }

    /// Execute a write; returns the change count and last insert id.
    pub fn run(self) -> Result<RunResult, DbError> {
        self.with_conn(|conn, params| {
            let changes = conn.execute(&self.sql, params)?;
            Ok(RunResult {
                changes,
                last_row_id: conn.last_insert_rowid(),
            })
        })
    }

    /// First row, if any.
    pub fn first<T: FromRow>(self) -> Result<Option<T>, DbError> {
        self.with_conn(|conn, params| {
            let mut stmt = conn.prepare(&self.sql)?;
            let mut rows = stmt.query(params)?;
            match rows.next()? {
                Some(row) => Ok(Some(T::from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Every row.
    pub fn all<T: FromRow>(self) -> Result<Vec<T>, DbError> {
        self.with_conn(|conn, params| {
            let mut stmt = conn.prepare(&self.sql)?;
            let rows = stmt.query_map(params, |row| T::from_row(row))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// First column of the first row, if any.
    pub fn scalar<T: FromSql>(self) -> Result<Option<T>, DbError> {
        self.with_conn(|conn, params| {
            let mut stmt = conn.prepare(&self.sql)?;
            let mut rows = stmt.query(params)?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }
}

/// Canonical timestamp encoding. Fixed width so text comparison orders correctly.
pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a column written by [`ts`].
pub fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read and parse a timestamp column.
pub fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

/// Read and deserialize a JSON text column.
pub fn get_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair(String, i64);

    impl FromRow for Pair {
        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Pair(row.get(0)?, row.get(1)?))
        }
    }

    fn db_with_table() -> Database {
        let db = Database::in_memory().unwrap();
        db.prepare("CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER NOT NULL)")
            .run()
            .unwrap();
        db
    }

    #[test]
    fn test_run_first_all() {
        let db = db_with_table();
        let res = db
            .prepare("INSERT INTO t (k, v) VALUES (?, ?)")
            .bind("a")
            .bind(1i64)
            .run()
            .unwrap();
        assert_eq!(res.changes, 1);
        db.prepare("INSERT INTO t (k, v) VALUES (?, ?)")
            .bind("b".to_string())
            .bind(2i64)
            .run()
            .unwrap();

        let first: Option<Pair> = db
            .prepare("SELECT k, v FROM t WHERE k = ?")
            .bind("b")
            .first()
            .unwrap();
        let first = first.unwrap();
        assert_eq!(first.0, "b");
        assert_eq!(first.1, 2);

        let all: Vec<Pair> = db.prepare("SELECT k, v FROM t ORDER BY k").all().unwrap();
        assert_eq!(all.len(), 2);

        let missing: Option<Pair> = db
            .prepare("SELECT k, v FROM t WHERE k = ?")
            .bind("zzz")
            .first()
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_scalar() {
        let db = db_with_table();
        let count: Option<i64> = db.prepare("SELECT COUNT(*) FROM t").scalar().unwrap();
        assert_eq!(count, Some(0));
    }

    #[test]
    fn test_constraint_violation_is_typed() {
        let db = db_with_table();
        db.prepare("INSERT INTO t (k, v) VALUES ('a', 1)").run().unwrap();
        let err = db
            .prepare("INSERT INTO t (k, v) VALUES ('a', 2)")
            .run()
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = db_with_table();
        let result: Result<(), DbError> = db.transaction(|tx| {
            tx.prepare("INSERT INTO t (k, v) VALUES ('a', 1)").run()?;
            tx.prepare("INSERT INTO t (k, v) VALUES ('a', 2)").run()?;
            Ok(())
        });
        assert!(result.is_err());

        let count: Option<i64> = db.prepare("SELECT COUNT(*) FROM t").scalar().unwrap();
        assert_eq!(count, Some(0));
    }

    #[test]
    fn test_transaction_commits() {
        let db = db_with_table();
        db.transaction(|tx| {
            tx.prepare("INSERT INTO t (k, v) VALUES ('a', 1)").run()?;
            tx.prepare("INSERT INTO t (k, v) VALUES ('b', 2)").run()?;
            Ok::<_, DbError>(())
        })
        .unwrap();

        let count: Option<i64> = db.prepare("SELECT COUNT(*) FROM t").scalar().unwrap();
        assert_eq!(count, Some(2));
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(ts(earlier) < ts(later));
        assert_eq!(parse_ts(0, &ts(later)).unwrap(), later);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inkwell.db");
        let db = Database::open(&path).unwrap();
        let count: Option<i64> = db
            .prepare("SELECT COUNT(*) FROM manuscripts")
            .scalar()
            .unwrap();
        assert_eq!(count, Some(0));
        assert!(path.exists());
    }
}
