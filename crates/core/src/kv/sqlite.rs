use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::db::{ts, Database};

use super::{KvError, KvStore};

/// `kv_entries` table on the shared relational store.
pub struct SqliteKvStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl SqliteKvStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<String> {
        ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| ts(self.clock.now() + ttl))
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let value: Option<String> = self
            .db
            .prepare(
                "SELECT value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
            )
            .bind(key)
            .bind(ts(self.clock.now()))
            .scalar()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.db
            .prepare(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            )
            .bind(key)
            .bind(value)
            .bind(self.expiry(ttl))
            .run()?;
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let now = ts(self.clock.now());
        let expires_at = self.expiry(ttl);

        self.db.transaction(|tx| {
            let current: Option<String> = tx
                .prepare(
                    "SELECT value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
                )
                .bind(key)
                .bind(now.clone())
                .scalar()?;

            if current.as_deref() != expected {
                return Ok(false);
            }

            tx.prepare(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            )
            .bind(key)
            .bind(value)
            .bind(expires_at.clone())
            .run()?;
            Ok::<_, KvError>(true)
        })
    }

    fn delete(&self, key: &str) -> Result<bool, KvError> {
        let res = self
            .db
            .prepare("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .run()?;
        Ok(res.changes > 0)
    }

    fn purge_expired(&self) -> Result<usize, KvError> {
        let res = self
            .db
            .prepare("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(ts(self.clock.now()))
            .run()?;
        if res.changes > 0 {
            tracing::debug!(purged = res.changes, "Purged expired key-value entries");
        }
        Ok(res.changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn store() -> (SqliteKvStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let db = Arc::new(Database::in_memory().unwrap());
        (SqliteKvStore::new(db, clock.clone()), clock)
    }

    #[test]
    fn test_put_get_delete() {
        let (kv, _) = store();
        kv.put("status:abc", "{}", None).unwrap();
        assert_eq!(kv.get("status:abc").unwrap().as_deref(), Some("{}"));
        assert!(kv.delete("status:abc").unwrap());
        assert!(kv.get("status:abc").unwrap().is_none());
        assert!(!kv.delete("status:abc").unwrap());
    }

    #[test]
    fn test_entries_expire() {
        let (kv, clock) = store();
        kv.put("status:abc", "v", Some(Duration::from_secs(60)))
            .unwrap();
        clock.advance(chrono::Duration::seconds(59));
        assert!(kv.get("status:abc").unwrap().is_some());
        clock.advance(chrono::Duration::seconds(2));
        assert!(kv.get("status:abc").unwrap().is_none());
    }

    #[test]
    fn test_purge_expired() {
        let (kv, clock) = store();
        kv.put("a", "1", Some(Duration::from_secs(10))).unwrap();
        kv.put("b", "2", Some(Duration::from_secs(1000))).unwrap();
        kv.put("c", "3", None).unwrap();
        clock.advance(chrono::Duration::seconds(11));
        assert_eq!(kv.purge_expired().unwrap(), 1);
        assert!(kv.get("b").unwrap().is_some());
        assert!(kv.get("c").unwrap().is_some());
    }

    #[test]
    fn test_compare_and_swap() {
        let (kv, _) = store();
        assert!(kv.compare_and_swap("k", None, "one", None).unwrap());
        assert!(!kv.compare_and_swap("k", None, "two", None).unwrap());
        assert!(!kv.compare_and_swap("k", Some("stale"), "two", None).unwrap());
        assert!(kv.compare_and_swap("k", Some("one"), "two", None).unwrap());
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_expired_entry_counts_as_absent_for_cas() {
        let (kv, clock) = store();
        kv.put("k", "old", Some(Duration::from_secs(5))).unwrap();
        clock.advance(chrono::Duration::seconds(6));
        assert!(kv.compare_and_swap("k", None, "new", None).unwrap());
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn test_key_helpers() {
        assert_eq!(crate::kv::status_key("r1"), "status:r1");
        assert_eq!(crate::kv::report_lookup_key("r1"), "report-id:r1");
    }
}
