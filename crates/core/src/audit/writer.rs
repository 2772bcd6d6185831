use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Background task draining the audit channel into an [`AuditStore`].
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every [`AuditHandle`] has been dropped.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord::from_event(envelope.timestamp, envelope.event);
            let store = Arc::clone(&self.store);
            // SQLite inserts block; keep them off the async workers.
            let result = tokio::task::spawn_blocking(move || store.insert(&record)).await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Failed to write audit event: {}", e),
                Err(e) => tracing::error!("Audit insert task failed: {}", e),
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create a handle/writer pair sharing a channel of `buffer_size` events.
///
/// Spawn the writer with `tokio::spawn(writer.run())`; it exits once every
/// clone of the handle is dropped.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter};

    /// Mock store that records insert calls
    struct MockStore {
        records: Mutex<Vec<AuditRecord>>,
        should_fail: bool,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                should_fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                should_fail: true,
            }
        }

        fn get_records(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AuditStore for MockStore {
        fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
            if self.should_fail {
                return Err(AuditError::Database("Mock failure".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            let id = records.len() as i64 + 1;
            let mut stored = record.clone();
            stored.id = id;
            records.push(stored);
            Ok(id)
        }

        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(self.records.lock().unwrap().clone())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(self.records.lock().unwrap().len() as i64)
        }
    }

    fn state_changed(manuscript_id: &str, to: &str) -> AuditEvent {
        AuditEvent::ManuscriptStateChanged {
            manuscript_id: manuscript_id.to_string(),
            from_state: "draft".to_string(),
            to_state: to.to_string(),
            report_id: Some("r-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_writer_stores_events_with_extracted_ids() {
        let store = Arc::new(MockStore::new());
        let (handle, writer) = create_audit_system(store.clone(), 10);
        let writer_handle = tokio::spawn(writer.run());

        handle.emit(state_changed("m-1", "queued")).await;
        drop(handle);
        writer_handle.await.unwrap();

        let records = store.get_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "manuscript_state_changed");
        assert_eq!(records[0].manuscript_id.as_deref(), Some("m-1"));
        assert_eq!(records[0].report_id.as_deref(), Some("r-1"));
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let store = Arc::new(MockStore::failing());
        let (handle, writer) = create_audit_system(store, 10);
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            })
            .await;
        drop(handle);

        writer_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let store = Arc::new(MockStore::new());
        let (main_handle, writer) = create_audit_system(store.clone(), 10);
        let worker_handle = main_handle.clone();
        let writer_handle = tokio::spawn(writer.run());

        worker_handle.emit(state_changed("m-1", "analyzing")).await;
        main_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;

        drop(main_handle);
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        assert!(
            !writer_handle.is_finished(),
            "Writer should still be running with handles alive"
        );

        drop(worker_handle);
        let result = tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_handle).await;
        assert!(result.is_ok(), "Writer should exit after all handles dropped");

        let records = store.get_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event_type, "service_stopped");
    }
}
