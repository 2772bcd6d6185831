//! Namespaced key-value store with per-entry TTL.
//!
//! Holds the short-lived pipeline records:
//! - `status:{reportId}` job status, 7 days
//! - `report-id:{reportId}` raw manuscript key, 30 days

mod sqlite;

pub use sqlite::SqliteKvStore;

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Key-value store error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<crate::db::DbError> for KvError {
    fn from(e: crate::db::DbError) -> Self {
        KvError::Database(e.to_string())
    }
}

pub fn status_key(report_id: &str) -> String {
    format!("status:{}", report_id)
}

pub fn report_lookup_key(report_id: &str) -> String {
    format!("report-id:{}", report_id)
}

pub trait KvStore: Send + Sync {
    /// Live value for `key`; expired entries read as absent.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Unconditional write.
    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Write `value` only if the live value still equals `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError>;

    fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Remove expired entries; returns how many were dropped.
    fn purge_expired(&self) -> Result<usize, KvError>;
}
