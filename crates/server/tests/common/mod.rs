//! In-process test fixture: the full router over an in-memory pipeline.
//!
//! Workers are not started; tests lease deliveries by hand with
//! [`TestFixture::run_next`] so every job runs deterministically.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use inkwell_core::{
    audit::{create_audit_system, AuditStore, SqliteAuditStore},
    queue::QueueName,
    testing::{fixtures, ManualClock, MemoryObjectStore, MockLlmClient},
    Config, JobOutcome, Orchestrator, PipelineContext, PipelineService,
    TrustedHeaderAuthenticator,
};
use inkwell_server::{create_router, AppState};

pub const USER: &str = "author-1";
pub const OTHER_USER: &str = "author-2";

const BOUNDARY: &str = "inkwell-test-boundary";

pub struct TestFixture {
    pub router: Router,
    pub ctx: Arc<PipelineContext>,
    pub clock: Arc<ManualClock>,
    pub llm: Arc<MockLlmClient>,
    pub orchestrator: Orchestrator,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub raw: Bytes,
    pub body: Value,
}

/// One multipart part.
pub struct Part<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            content_type: None,
            data: value.as_bytes(),
        }
    }

    pub fn file(file_name: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            name: "file",
            file_name: Some(file_name),
            content_type: Some(content_type),
            data,
        }
    }
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match part.file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.name, file_name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
        };
        body.extend_from_slice(disposition.as_bytes());
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(fixtures::test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let (db, clock) = fixtures::database();
        let objects = Arc::new(MemoryObjectStore::new());
        let llm = Arc::new(MockLlmClient::new());

        let audit_store: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::new(db.clone()));
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let ctx = Arc::new(
            PipelineContext::builder(config.clone())
                .with_clock(clock.clone())
                .with_database(db)
                .with_object_store(objects)
                .with_llm(llm.clone())
                .with_audit(audit_handle)
                .build()
                .expect("pipeline context"),
        );

        let state = Arc::new(AppState::new(
            config.clone(),
            Arc::new(TrustedHeaderAuthenticator::new(config.auth.user_header.clone())),
            Arc::new(PipelineService::new(ctx.clone())),
            audit_store,
            None,
        ));

        Self {
            router: create_router(state),
            orchestrator: Orchestrator::new(ctx.clone()),
            ctx,
            clock,
            llm,
        }
    }

    /// Lease the next delivery on `queue` and run it to settlement.
    pub async fn run_next(&self, queue: QueueName) -> JobOutcome {
        let delivery = self
            .ctx
            .queue
            .receive(queue)
            .expect("receive")
            .expect("a delivery is waiting");
        self.orchestrator.handle(delivery).await
    }

    pub async fn get(&self, path: &str, user: Option<&str>) -> TestResponse {
        self.send(Self::builder("GET", path, user).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, path: &str, user: &str) -> TestResponse {
        self.send(Self::builder("DELETE", path, Some(user)).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, path: &str, user: &str) -> TestResponse {
        self.send(Self::builder("POST", path, Some(user)).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, path: &str, user: &str, body: Value) -> TestResponse {
        let request = Self::builder("POST", path, Some(user))
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    pub async fn put_raw(&self, path: &str, user: &str, content_type: &str, body: &[u8]) -> TestResponse {
        let request = Self::builder("PUT", path, Some(user))
            .header("Content-Type", content_type)
            .body(Body::from(body.to_vec()))
            .unwrap();
        self.send(request).await
    }

    pub async fn upload_parts(&self, user: &str, parts: &[Part<'_>]) -> TestResponse {
        let request = Self::builder("POST", "/api/v1/manuscripts", Some(user))
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        self.send(request).await
    }

    /// Upload `words` words of plain text with a title.
    pub async fn upload_text(&self, user: &str, title: &str, words: usize) -> TestResponse {
        let text = fixtures::manuscript_text(words);
        self.upload_parts(
            user,
            &[
                Part::text("title", title),
                Part::text("genre", "literary"),
                Part::file("draft.txt", "text/plain", text.as_bytes()),
            ],
        )
        .await
    }

    /// Upload and run the analysis job to completion; returns the manuscript id.
    pub async fn analyzed_manuscript(&self, user: &str) -> String {
        let response = self.upload_text(user, "The Orchard", 800).await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{:?}", response.body);
        let outcome = self.run_next(QueueName::Analysis).await;
        assert!(matches!(outcome, JobOutcome::Completed { .. }), "{outcome:?}");
        response.body["manuscriptId"].as_str().unwrap().to_string()
    }

    fn builder(method: &str, path: &str, user: Option<&str>) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(path);
        match user {
            Some(user) => builder.header("x-user-id", user),
            None => builder,
        }
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let raw = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if raw.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&raw).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            raw,
            body,
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
