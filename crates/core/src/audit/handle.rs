use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::AuditEvent;

/// Envelope wrapping an audit event with metadata
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

/// Handle for emitting audit events
///
/// Cheaply cloneable. Audit is advisory: a full or closed channel is logged
/// and the caller carries on.
#[derive(Clone)]
pub struct AuditHandle {
    tx: Option<mpsc::Sender<AuditEventEnvelope>>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Handle that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    fn envelope(event: AuditEvent) -> AuditEventEnvelope {
        AuditEventEnvelope {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Emit an event, waiting for channel capacity.
    pub async fn emit(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.send(Self::envelope(event)).await {
            tracing::error!("Failed to emit audit event: {}", e);
        }
    }

    /// Emit from a non-async context.
    pub fn emit_blocking(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.blocking_send(Self::envelope(event)) {
            tracing::error!("Failed to emit audit event: {}", e);
        }
    }

    /// Emit without waiting. Returns whether the event was queued.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        let Some(tx) = &self.tx else { return false };
        match tx.try_send(Self::envelope(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropped audit event: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled(report_id: &str) -> AuditEvent {
        AuditEvent::JobCancelled {
            user_id: "user-1".to_string(),
            report_id: report_id.to_string(),
            previous_state: "running".to_string(),
        }
    }

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        handle.emit(cancelled("r1")).await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert!(matches!(envelope.event, AuditEvent::JobCancelled { .. }));
    }

    #[test]
    fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = AuditHandle::new(tx);

        assert!(handle.try_emit(cancelled("r1")));
        assert!(!handle.try_emit(cancelled("r2")));
    }

    #[tokio::test]
    async fn test_emit_closed_channel_does_not_fail() {
        let (tx, rx) = mpsc::channel::<AuditEventEnvelope>(10);
        let handle = AuditHandle::new(tx);
        drop(rx);

        handle.emit(cancelled("r1")).await;
        assert!(!handle.try_emit(cancelled("r2")));
    }

    #[tokio::test]
    async fn test_disabled_handle_drops_events() {
        let handle = AuditHandle::disabled();
        handle.emit(cancelled("r1")).await;
        assert!(!handle.try_emit(cancelled("r2")));
    }

    #[test]
    fn test_envelope_has_timestamp() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        let before = Utc::now();
        handle.try_emit(cancelled("r1"));
        let after = Utc::now();

        let envelope = rx.try_recv().expect("Should receive event");
        assert!(envelope.timestamp >= before);
        assert!(envelope.timestamp <= after);
    }
}
