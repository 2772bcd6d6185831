use std::sync::Arc;

use rusqlite::{Row, ToSql};

use super::{AuditError, AuditFilter, AuditOrder, AuditRecord, AuditStore};
use crate::db::{get_json, get_ts, ts, Database, FromRow};

/// SQLite-backed audit store over the shared `audit_log` table
pub struct SqliteAuditStore {
    db: Arc<Database>,
}

impl SqliteAuditStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store over a private in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self, AuditError> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    fn build_where_clause(filter: &AuditFilter) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref manuscript_id) = filter.manuscript_id {
            conditions.push("manuscript_id = ?".to_string());
            params.push(Box::new(manuscript_id.clone()));
        }

        if let Some(ref report_id) = filter.report_id {
            conditions.push("report_id = ?".to_string());
            params.push(Box::new(report_id.clone()));
        }

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?".to_string());
            params.push(Box::new(user_id.clone()));
        }

        if !filter.event_types.is_empty() {
            let slots = vec!["?"; filter.event_types.len()].join(", ");
            conditions.push(format!("event_type IN ({slots})"));
            for event_type in &filter.event_types {
                params.push(Box::new(event_type.clone()));
            }
        }

        if let Some(from) = filter.from {
            conditions.push("timestamp >= ?".to_string());
            params.push(Box::new(ts(from)));
        }

        if let Some(to) = filter.to {
            conditions.push("timestamp <= ?".to_string());
            params.push(Box::new(ts(to)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl FromRow for AuditRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AuditRecord {
            id: row.get(0)?,
            timestamp: get_ts(row, 1)?,
            event_type: row.get(2)?,
            manuscript_id: row.get(3)?,
            report_id: row.get(4)?,
            user_id: row.get(5)?,
            data: get_json(row, 6)?,
        })
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        let result = self
            .db
            .prepare(
                "INSERT INTO audit_log (timestamp, event_type, manuscript_id, report_id, user_id, data)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(ts(record.timestamp))
            .bind(record.event_type.as_str())
            .bind(record.manuscript_id.as_deref())
            .bind(record.report_id.as_deref())
            .bind(record.user_id.as_deref())
            .bind(data_json)
            .run()?;

        Ok(result.last_row_id)
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let (where_clause, params) = Self::build_where_clause(filter);
        let order = match filter.order {
            AuditOrder::NewestFirst => "timestamp DESC, id DESC",
            AuditOrder::OldestFirst => "timestamp ASC, id ASC",
        };
        let sql = format!(
            "SELECT id, timestamp, event_type, manuscript_id, report_id, user_id, data
             FROM audit_log {where_clause} ORDER BY {order} LIMIT ? OFFSET ?"
        );

        Ok(self
            .db
            .prepare(sql)
            .bind_all(params)
            .bind(filter.limit)
            .bind(filter.offset)
            .all()?)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_log {where_clause}");

        Ok(self
            .db
            .prepare(sql)
            .bind_all(params)
            .scalar::<i64>()?
            .unwrap_or(0))
    }
}
