//! HTTP-level tests over the in-process router.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use inkwell_core::{queue::QueueName, testing::fixtures, JobOutcome};

use common::{Part, TestFixture, OTHER_USER, USER};

// =============================================================================
// System endpoints
// =============================================================================

#[tokio::test]
async fn test_health_needs_no_identity() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health", None).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_protected_route_without_identity_is_401() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/manuscripts", None).await;
    assert_status!(response, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["code"], "not_authenticated");
}

#[tokio::test]
async fn test_malformed_user_id_is_401() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/quota", Some("a/b")).await;
    assert_status!(response, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["code"], "invalid_credentials");
}

#[tokio::test]
async fn test_metrics_exposition() {
    let fixture = TestFixture::new();
    fixture.get("/api/v1/health", None).await;

    let response = fixture.get("/api/v1/metrics", None).await;
    assert_status!(response, StatusCode::OK);
    let text = String::from_utf8_lossy(&response.raw);
    assert!(text.contains("inkwell_http_requests_total"));
    assert!(text.contains("inkwell_queue_depth"));
}

#[tokio::test]
async fn test_workers_status_when_api_only() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/admin/workers", Some(USER)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], false);
}

// =============================================================================
// Upload
// =============================================================================

#[tokio::test]
async fn test_upload_queues_analysis() {
    let fixture = TestFixture::new();

    let response = fixture.upload_text(USER, "The Orchard", 500).await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["status"], "queued");
    let manuscript_id = response.body["manuscriptId"].as_str().unwrap();
    let report_id = response.body["reportId"].as_str().unwrap();

    let manuscript = fixture
        .get(&format!("/api/v1/manuscripts/{manuscript_id}"), Some(USER))
        .await;
    assert_status!(manuscript, StatusCode::OK);
    assert_eq!(manuscript.body["title"], "The Orchard");
    assert_eq!(manuscript.body["state"], "queued");
    assert_eq!(manuscript.body["wordCount"], 500);

    let job = fixture
        .get(&format!("/api/v1/jobs/{report_id}"), Some(USER))
        .await;
    assert_status!(job, StatusCode::OK);
    assert_eq!(job.body["state"], "queued");
    assert_eq!(job.body["pipeline"], "analysis");
}

#[tokio::test]
async fn test_upload_without_file_is_400() {
    let fixture = TestFixture::new();
    let response = fixture
        .upload_parts(USER, &[Part::text("title", "No file")])
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "invalid_request");
}

#[tokio::test]
async fn test_upload_empty_file_is_bad_file() {
    let fixture = TestFixture::new();
    let response = fixture
        .upload_parts(USER, &[Part::file("empty.txt", "text/plain", b"")])
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "bad_file");
}

#[tokio::test]
async fn test_upload_oversized_file_is_bad_file() {
    let mut config = fixtures::test_config();
    config.pipeline.max_file_bytes = 1024;
    let fixture = TestFixture::with_config(config);

    let text = fixtures::manuscript_text(1_000);
    let response = fixture
        .upload_parts(USER, &[Part::file("long.txt", "text/plain", text.as_bytes())])
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "bad_file");
    assert!(response.body["error"].as_str().unwrap().contains("size limit"));
}

#[tokio::test]
async fn test_upload_with_exhausted_quota_is_403() {
    let fixture = TestFixture::new();
    fixtures::exhaust_quota(&fixture.ctx, USER);

    let response = fixture.upload_text(USER, "One too many", 300).await;
    assert_status!(response, StatusCode::FORBIDDEN);
    assert_eq!(response.body["code"], "quota_exceeded");
    assert_eq!(response.body["planType"], "free");
    assert_eq!(response.body["used"], response.body["limit"]);

    let listing = fixture.get("/api/v1/manuscripts", Some(USER)).await;
    assert_eq!(listing.body["items"].as_array().unwrap().len(), 0);
}

// =============================================================================
// Reads and ownership
// =============================================================================

#[tokio::test]
async fn test_other_users_manuscript_is_404() {
    let fixture = TestFixture::new();
    let response = fixture.upload_text(USER, "Mine", 300).await;
    let id = response.body["manuscriptId"].as_str().unwrap();

    let response = fixture
        .get(&format!("/api/v1/manuscripts/{id}"), Some(OTHER_USER))
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = fixture
        .delete(&format!("/api/v1/manuscripts/{id}"), OTHER_USER)
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_listing_pages_with_cursor() {
    let fixture = TestFixture::new();
    for (i, title) in ["First", "Second", "Third"].iter().enumerate() {
        let response = fixture.upload_text(USER, title, 200 + i).await;
        assert_status!(response, StatusCode::ACCEPTED);
        fixture.clock.advance(chrono::Duration::seconds(1));
    }

    let first = fixture.get("/api/v1/manuscripts?limit=2", Some(USER)).await;
    assert_status!(first, StatusCode::OK);
    let items = first.body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["title"], "Third");
    let cursor = first.body["nextCursor"].as_str().unwrap();

    let second = fixture
        .get(&format!("/api/v1/manuscripts?limit=2&cursor={cursor}"), Some(USER))
        .await;
    assert_status!(second, StatusCode::OK);
    let items = second.body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "First");
    assert!(second.body["nextCursor"].is_null());
}

#[tokio::test]
async fn test_garbage_cursor_is_400() {
    let fixture = TestFixture::new();
    let response = fixture
        .get("/api/v1/manuscripts?cursor=not-a-cursor", Some(USER))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Analysis, artifacts and regeneration
// =============================================================================

#[tokio::test]
async fn test_analysis_publishes_editorial_artifacts() {
    let fixture = TestFixture::new();
    let id = fixture.analyzed_manuscript(USER).await;

    let status = fixture
        .get(&format!("/api/v1/manuscripts/{id}/status"), Some(USER))
        .await;
    assert_status!(status, StatusCode::OK);
    assert_eq!(status.body["state"], "analyzed");
    assert_eq!(status.body["pendingStages"], json!([]));
    assert_eq!(
        status.body["completedStages"],
        json!(["developmental", "line-editing", "copy-editing"])
    );

    let artifacts = fixture
        .get(&format!("/api/v1/manuscripts/{id}/artifacts"), Some(USER))
        .await;
    assert_status!(artifacts, StatusCode::OK);
    assert_eq!(artifacts.body.as_array().unwrap().len(), 3);

    let body = fixture
        .get(
            &format!("/api/v1/manuscripts/{id}/artifacts/developmental"),
            Some(USER),
        )
        .await;
    assert_status!(body, StatusCode::OK);
    assert_eq!(body.headers["x-artifact-version"], "1");
    assert!(body.headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));
    assert!(body.body.is_object());

    let quota = fixture.get("/api/v1/quota", Some(USER)).await;
    assert_status!(quota, StatusCode::OK);
    assert_eq!(quota.body["usedThisPeriod"], 1);
}

#[tokio::test]
async fn test_unknown_artifact_kind_is_400_and_missing_is_404() {
    let fixture = TestFixture::new();
    let id = fixture.analyzed_manuscript(USER).await;

    let unknown = fixture
        .get(&format!("/api/v1/manuscripts/{id}/artifacts/sonnet"), Some(USER))
        .await;
    assert_status!(unknown, StatusCode::BAD_REQUEST);

    let missing = fixture
        .get(&format!("/api/v1/manuscripts/{id}/artifacts/keywords"), Some(USER))
        .await;
    assert_status!(missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analyze_while_queued_returns_existing_job() {
    let fixture = TestFixture::new();
    let upload = fixture.upload_text(USER, "Busy", 300).await;
    let id = upload.body["manuscriptId"].as_str().unwrap();

    let response = fixture
        .post(&format!("/api/v1/manuscripts/{id}/analyze"), USER)
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["existing"], true);
    assert_eq!(response.body["reportId"], upload.body["reportId"]);
}

#[tokio::test]
async fn test_regenerate_before_analysis_is_422() {
    let fixture = TestFixture::new();
    let upload = fixture.upload_text(USER, "Too soon", 300).await;
    let id = upload.body["manuscriptId"].as_str().unwrap();

    let response = fixture
        .post(&format!("/api/v1/manuscripts/{id}/regenerate"), USER)
        .await;
    assert_status!(response, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.body["code"], "precondition_missing");
}

#[tokio::test]
async fn test_regenerate_assets_after_analysis() {
    let fixture = TestFixture::new();
    let id = fixture.analyzed_manuscript(USER).await;

    let response = fixture
        .post(&format!("/api/v1/manuscripts/{id}/regenerate"), USER)
        .await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["pipeline"], "assets");

    let outcome = fixture.run_next(QueueName::Assets).await;
    assert!(matches!(outcome, JobOutcome::Completed { .. }), "{outcome:?}");

    let keywords = fixture
        .get(&format!("/api/v1/manuscripts/{id}/artifacts/keywords"), Some(USER))
        .await;
    assert_status!(keywords, StatusCode::OK);
}

#[tokio::test]
async fn test_regenerate_rejects_mixed_and_unknown_kinds() {
    let fixture = TestFixture::new();
    let id = fixture.analyzed_manuscript(USER).await;
    let path = format!("/api/v1/manuscripts/{id}/regenerate");

    let mixed = fixture
        .post_json(&path, USER, json!({ "kinds": ["copy-editing", "keywords"] }))
        .await;
    assert_status!(mixed, StatusCode::BAD_REQUEST);

    let unknown = fixture
        .post_json(&path, USER, json!({ "kinds": ["limerick"] }))
        .await;
    assert_status!(unknown, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_human_edit_versions_increase() {
    let fixture = TestFixture::new();
    let id = fixture.analyzed_manuscript(USER).await;
    let path = format!("/api/v1/manuscripts/{id}/human-edits/chapter-1");

    let first = fixture
        .put_raw(&path, USER, "text/plain", b"It was a bright cold day.")
        .await;
    assert_status!(first, StatusCode::CREATED);
    assert_eq!(first.body["kind"], "human-edit:chapter-1");
    assert_eq!(first.body["version"], 1);

    let second = fixture
        .put_raw(&path, USER, "text/plain", b"It was a bright cold day in April.")
        .await;
    assert_status!(second, StatusCode::CREATED);
    assert_eq!(second.body["version"], 2);

    let empty = fixture.put_raw(&path, USER, "text/plain", b"").await;
    assert_status!(empty, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Jobs and deletion
// =============================================================================

#[tokio::test]
async fn test_cancel_queued_job() {
    let fixture = TestFixture::new();
    let upload = fixture.upload_text(USER, "Cancel me", 300).await;
    let report_id = upload.body["reportId"].as_str().unwrap();

    let response = fixture
        .delete(&format!("/api/v1/jobs/{report_id}"), USER)
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["state"], "cancelled");

    let outcome = fixture.run_next(QueueName::Analysis).await;
    assert!(
        matches!(outcome, JobOutcome::Cancelled | JobOutcome::Skipped { .. }),
        "{outcome:?}"
    );
    assert_eq!(fixture.llm.call_count().await, 0);
}

#[tokio::test]
async fn test_other_users_job_is_404() {
    let fixture = TestFixture::new();
    let upload = fixture.upload_text(USER, "Private", 300).await;
    let report_id = upload.body["reportId"].as_str().unwrap();

    let response = fixture
        .get(&format!("/api/v1/jobs/{report_id}"), Some(OTHER_USER))
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_manuscript_removes_artifacts() {
    let fixture = TestFixture::new();
    let id = fixture.analyzed_manuscript(USER).await;

    let response = fixture
        .delete(&format!("/api/v1/manuscripts/{id}"), USER)
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["artifactsRemoved"], 3);

    let gone = fixture
        .get(&format!("/api/v1/manuscripts/{id}"), Some(USER))
        .await;
    assert_status!(gone, StatusCode::NOT_FOUND);
}

// =============================================================================
// Operator endpoints
// =============================================================================

#[tokio::test]
async fn test_dead_letter_listing_and_requeue_errors() {
    let fixture = TestFixture::new();

    let empty = fixture.get("/api/v1/admin/dead-letters", Some(USER)).await;
    assert_status!(empty, StatusCode::OK);
    assert_eq!(empty.body, json!([]));

    let bad_queue = fixture
        .get("/api/v1/admin/dead-letters?queue=mail", Some(USER))
        .await;
    assert_status!(bad_queue, StatusCode::BAD_REQUEST);

    let missing = fixture
        .post("/api/v1/admin/dead-letters/999/requeue", USER)
        .await;
    assert_status!(missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_audit_records_upload() {
    let fixture = TestFixture::new();
    let upload = fixture.upload_text(USER, "Audited", 300).await;
    let id = upload.body["manuscriptId"].as_str().unwrap().to_string();

    // The writer is asynchronous; poll until the event lands.
    let path = format!("/api/v1/audit?manuscriptId={id}&eventType=upload");
    let mut total = 0;
    for _ in 0..50 {
        let response = fixture.get(&path, Some(USER)).await;
        assert_status!(response, StatusCode::OK);
        total = response.body["total"].as_i64().unwrap();
        if total > 0 {
            assert_eq!(response.body["events"][0]["manuscript_id"], id);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_job_trail_lists_a_run_in_order() {
    let fixture = TestFixture::new();
    let id = fixture.analyzed_manuscript(USER).await;
    let manuscript = fixture.get(&format!("/api/v1/manuscripts/{id}"), Some(USER)).await;
    let report_id = manuscript.body["latestReportId"].as_str().unwrap().to_string();

    let path = format!("/api/v1/audit/jobs/{report_id}");
    let mut types = Vec::new();
    for _ in 0..50 {
        let response = fixture.get(&path, Some(USER)).await;
        assert_status!(response, StatusCode::OK);
        assert_eq!(response.body["reportId"], report_id);
        types = response.body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap().to_string())
            .collect();
        if types.last().map(String::as_str) == Some("job_state_changed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(types.last().map(String::as_str), Some("job_state_changed"));
    assert_eq!(types.iter().filter(|t| *t == "stage_completed").count(), 3);
    assert!(types.iter().any(|t| t == "usage_recorded"));
    assert!(types.iter().any(|t| t == "job_enqueued"));
}
