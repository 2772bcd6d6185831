use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Manuscript lifecycle
    /// A manuscript was accepted by the ingestor.
    ManuscriptUploaded {
        user_id: String,
        manuscript_id: String,
        report_id: String,
        file_name: String,
        file_type: String,
        size_bytes: u64,
        content_hash: String,
        /// Earlier manuscript of the same owner with identical bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duplicate_of: Option<String>,
    },
    ManuscriptStateChanged {
        manuscript_id: String,
        from_state: String,
        to_state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report_id: Option<String>,
    },
    ManuscriptDeleted {
        user_id: String,
        manuscript_id: String,
        artifacts_removed: usize,
    },

    // Job lifecycle
    JobEnqueued {
        user_id: String,
        manuscript_id: String,
        report_id: String,
        pipeline: String,
        queue: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_report_id: Option<String>,
    },
    JobStateChanged {
        report_id: String,
        from_state: String,
        to_state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    JobCancelled {
        user_id: String,
        report_id: String,
        previous_state: String,
    },
    JobDeadLettered {
        manuscript_id: String,
        report_id: String,
        attempts: u32,
        reason: String,
    },
    /// A dead-lettered job was replayed as a new job.
    JobRequeued {
        user_id: String,
        manuscript_id: String,
        report_id: String,
        parent_report_id: String,
    },
    RegenerationRequested {
        user_id: String,
        manuscript_id: String,
        report_id: String,
        pipeline: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        kinds: Vec<String>,
    },
    QuotaRejected {
        user_id: String,
        plan_type: String,
        used: u32,
        limit: u32,
    },

    // Stage execution
    StageCompleted {
        manuscript_id: String,
        report_id: String,
        stage: String,
        model: String,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
        duration_ms: u64,
    },
    StageFailed {
        manuscript_id: String,
        report_id: String,
        stage: String,
        attempt: u32,
        error: String,
    },
    ArtifactPublished {
        manuscript_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report_id: Option<String>,
        kind: String,
        version: u32,
        storage_key: String,
        size_bytes: u64,
    },
    UsageRecorded {
        user_id: String,
        manuscript_id: String,
        report_id: String,
        plan_type: String,
        analysis_type: String,
        total_cost_usd: f64,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::ManuscriptUploaded { .. } => "upload",
            Self::ManuscriptStateChanged { .. } => "manuscript_state_changed",
            Self::ManuscriptDeleted { .. } => "manuscript_deleted",
            Self::JobEnqueued { .. } => "job_enqueued",
            Self::JobStateChanged { .. } => "job_state_changed",
            Self::JobCancelled { .. } => "job_cancelled",
            Self::JobDeadLettered { .. } => "job_dead_lettered",
            Self::JobRequeued { .. } => "job_requeued",
            Self::RegenerationRequested { .. } => "regeneration_requested",
            Self::QuotaRejected { .. } => "quota_rejected",
            Self::StageCompleted { .. } => "stage_completed",
            Self::StageFailed { .. } => "stage_failed",
            Self::ArtifactPublished { .. } => "artifact_published",
            Self::UsageRecorded { .. } => "usage_recorded",
        }
    }

    /// Extract manuscript_id if this event concerns one manuscript
    pub fn manuscript_id(&self) -> Option<&str> {
        match self {
            Self::ManuscriptUploaded { manuscript_id, .. }
            | Self::ManuscriptStateChanged { manuscript_id, .. }
            | Self::ManuscriptDeleted { manuscript_id, .. }
            | Self::JobEnqueued { manuscript_id, .. }
            | Self::JobDeadLettered { manuscript_id, .. }
            | Self::JobRequeued { manuscript_id, .. }
            | Self::RegenerationRequested { manuscript_id, .. }
            | Self::StageCompleted { manuscript_id, .. }
            | Self::StageFailed { manuscript_id, .. }
            | Self::ArtifactPublished { manuscript_id, .. }
            | Self::UsageRecorded { manuscript_id, .. } => Some(manuscript_id),
            _ => None,
        }
    }

    /// Extract report_id if this event concerns one job
    pub fn report_id(&self) -> Option<&str> {
        match self {
            Self::ManuscriptUploaded { report_id, .. }
            | Self::JobEnqueued { report_id, .. }
            | Self::JobStateChanged { report_id, .. }
            | Self::JobCancelled { report_id, .. }
            | Self::JobDeadLettered { report_id, .. }
            | Self::JobRequeued { report_id, .. }
            | Self::RegenerationRequested { report_id, .. }
            | Self::StageCompleted { report_id, .. }
            | Self::StageFailed { report_id, .. }
            | Self::UsageRecorded { report_id, .. } => Some(report_id),
            Self::ManuscriptStateChanged { report_id, .. }
            | Self::ArtifactPublished { report_id, .. } => report_id.as_deref(),
            _ => None,
        }
    }

    /// Extract user_id if this event was triggered by a user action
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::ManuscriptUploaded { user_id, .. }
            | Self::ManuscriptDeleted { user_id, .. }
            | Self::JobEnqueued { user_id, .. }
            | Self::JobCancelled { user_id, .. }
            | Self::JobRequeued { user_id, .. }
            | Self::RegenerationRequested { user_id, .. }
            | Self::QuotaRejected { user_id, .. }
            | Self::UsageRecorded { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub manuscript_id: Option<String>,
    pub report_id: Option<String>,
    pub user_id: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// Unsaved record for `event`; the store assigns the id.
    pub fn from_event(timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            manuscript_id: event.manuscript_id().map(String::from),
            report_id: event.report_id().map(String::from),
            user_id: event.user_id().map(String::from),
            data: event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded() -> AuditEvent {
        AuditEvent::ManuscriptUploaded {
            user_id: "user-1".to_string(),
            manuscript_id: "m-1".to_string(),
            report_id: "r-1".to_string(),
            file_name: "novel.txt".to_string(),
            file_type: "txt".to_string(),
            size_bytes: 1024,
            content_hash: "abc".to_string(),
            duplicate_of: None,
        }
    }

    #[test]
    fn test_event_type_service_started() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.manuscript_id(), None);
        assert_eq!(event.report_id(), None);
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_upload_event_uses_upload_action() {
        let event = uploaded();
        assert_eq!(event.event_type(), "upload");
        assert_eq!(event.manuscript_id(), Some("m-1"));
        assert_eq!(event.report_id(), Some("r-1"));
        assert_eq!(event.user_id(), Some("user-1"));
    }

    #[test]
    fn test_state_change_optional_report() {
        let event = AuditEvent::ManuscriptStateChanged {
            manuscript_id: "m-1".to_string(),
            from_state: "draft".to_string(),
            to_state: "queued".to_string(),
            report_id: None,
        };
        assert_eq!(event.report_id(), None);
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_serialize_deserialize_upload() {
        let event = uploaded();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"manuscript_uploaded\""));
        assert!(!json.contains("duplicate_of"));

        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_record_from_event() {
        let now = Utc::now();
        let record = AuditRecord::from_event(now, uploaded());
        assert_eq!(record.id, 0);
        assert_eq!(record.event_type, "upload");
        assert_eq!(record.manuscript_id.as_deref(), Some("m-1"));
        assert_eq!(record.timestamp, now);
    }
}
