use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<crate::db::DbError> for AuditError {
    fn from(e: crate::db::DbError) -> Self {
        AuditError::Database(e.to_string())
    }
}

/// Page size when the caller does not pick one.
pub const DEFAULT_AUDIT_LIMIT: i64 = 100;

/// Cap on one job's trail. A job with every retry used stays far below it.
pub const JOB_TRAIL_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Audit query. Scope fields combine with AND; `event_types` matches any
/// of the listed types.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub manuscript_id: Option<String>,
    pub report_id: Option<String>,
    pub user_id: Option<String>,
    pub event_types: Vec<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub order: AuditOrder,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            manuscript_id: None,
            report_id: None,
            user_id: None,
            event_types: Vec::new(),
            from: None,
            to: None,
            order: AuditOrder::NewestFirst,
            limit: DEFAULT_AUDIT_LIMIT,
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded against one manuscript, newest first.
    pub fn for_manuscript(manuscript_id: impl Into<String>) -> Self {
        Self::new().manuscript(manuscript_id)
    }

    /// One job's events in the order they happened.
    pub fn for_report(report_id: impl Into<String>) -> Self {
        Self {
            report_id: Some(report_id.into()),
            order: AuditOrder::OldestFirst,
            limit: JOB_TRAIL_LIMIT,
            ..Self::default()
        }
    }

    pub fn manuscript(mut self, manuscript_id: impl Into<String>) -> Self {
        self.manuscript_id = Some(manuscript_id.into());
        self
    }

    pub fn report(mut self, report_id: impl Into<String>) -> Self {
        self.report_id = Some(report_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Add one accepted event type, e.g. `stage_failed`.
    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// Trait for audit event storage
pub trait AuditStore: Send + Sync {
    /// Insert an audit record, returns the assigned ID
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Count matching audit records, ignoring limit and offset
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;

    /// Everything recorded for one job, oldest first.
    fn job_trail(&self, report_id: &str) -> Result<Vec<AuditRecord>, AuditError> {
        self.query(&AuditFilter::for_report(report_id))
    }
}
