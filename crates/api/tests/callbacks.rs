//! Integration tests for the signed callback surface.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use serde_json::json;

use common::{
    body_json, build_test_app, post_signed, seed_processing_job, send_with_key, FakeEngine,
    ADMIN_KEY, ADMIN_SECRET,
};
use docrelay_api::auth::GenerateApiKey;
use docrelay_core::scheduling::JobStatus;
use docrelay_store::models::api_key::{Permission, RateLimitTier};
use docrelay_store::models::job::Job;
use docrelay_store::models::queue_item::{HistoryKind, QueueFilter, QueueItemStatus};

const DEAL: &str = "Acme Tower";
const RENT_ROLL: &str = "/deals/acme/rent_roll.pdf";
const T12: &str = "/deals/acme/t12.xlsx";

fn result_body(job: &Job, status: &str) -> serde_json::Value {
    json!({
        "jobId": job.id,
        "dealName": job.deal_name,
        "workflowType": "document_analysis",
        "status": status,
        "processedDocuments": job.total_documents,
        "totalDocuments": job.total_documents,
        "averageConfidence": 0.91,
        "processingTimeMs": 1200,
        "templatesUpdated": ["underwriting_model.xlsx"],
        "timestamp": Utc::now(),
        "executionId": "exec-1",
    })
}

fn bytes(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}

// ---------------------------------------------------------------------------
// Test: a signed completion callback completes the job and its queue items
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_callback_syncs_job_and_queue() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL, T12]).await;

    let body = bytes(&result_body(&job, "completed"));
    let response = post_signed(test.app(), "/webhook/results", ADMIN_KEY, ADMIN_SECRET, &body).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["applied"], true);
    assert_eq!(json["data"]["status"], "completed");

    let stored = test.state.registries.tracker.get_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);

    let items = test.state.registries.queue.query(&QueueFilter::default()).await;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.status == QueueItemStatus::Completed));

    let history = test.state.registries.queue.history_for(DEAL, Some(RENT_ROLL)).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, HistoryKind::Analysis);
}

// ---------------------------------------------------------------------------
// Test: a signature over a different body is rejected, tracker untouched
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mutated_body_fails_signature_check() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;

    let signed = bytes(&result_body(&job, "completed"));
    let signature = docrelay_core::signing::sign_body(ADMIN_SECRET, &signed);
    let mut tampered = result_body(&job, "completed");
    tampered["averageConfidence"] = json!(0.99);

    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/webhook/results")
        .header("content-type", "application/json")
        .header("x-api-key", ADMIN_KEY)
        .header("x-signature", signature)
        .header("x-timestamp", Utc::now().timestamp().to_string())
        .body(axum::body::Body::from(bytes(&tampered)))
        .unwrap();
    let response = tower::ServiceExt::oneshot(test.app(), request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let stored = test.state.registries.tracker.get_job(job.id).await.unwrap();
    assert_eq!(stored, job);
}

// ---------------------------------------------------------------------------
// Test: an unsigned callback is rejected even with a valid key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsigned_callback_is_rejected() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;

    let response = send_with_key(
        test.app(),
        Method::POST,
        "/webhook/results",
        ADMIN_KEY,
        Some(result_body(&job, "completed")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Test: a key without submit_results is forbidden
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_only_key_cannot_submit_results() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;
    let key = test
        .state
        .auth
        .generate_api_key(GenerateApiKey {
            name: "dashboard".into(),
            description: None,
            permissions: vec![Permission::ReadStatus],
            tier: RateLimitTier::Standard,
            expires_in_days: None,
        })
        .await
        .unwrap();

    let body = bytes(&result_body(&job, "completed"));
    let response = post_signed(test.app(), "/webhook/results", &key.raw_key, &key.signing_secret, &body).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Test: a schema violation answers 400 with the offending fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn schema_violation_returns_400() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;

    let mut payload = result_body(&job, "completed");
    payload["averageConfidence"] = json!(1.7);
    payload.as_object_mut().unwrap().remove("timestamp");
    let response = post_signed(test.app(), "/webhook/results", ADMIN_KEY, ADMIN_SECRET, &bytes(&payload)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "SCHEMA_VALIDATION_FAILED");
    let fields: Vec<&str> = json["details"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"averageConfidence"));
    assert!(fields.contains(&"timestamp"));

    let stored = test.state.registries.tracker.get_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
}

// ---------------------------------------------------------------------------
// Test: callbacks for unknown jobs answer 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404() {
    let test = build_test_app(FakeEngine::new()).await;
    let mut job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;
    job.id = docrelay_core::types::new_id();

    let body = bytes(&result_body(&job, "completed"));
    let response = post_signed(test.app(), "/webhook/results", ADMIN_KEY, ADMIN_SECRET, &body).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: callbacks for cancelled jobs are acknowledged but not applied
// ---------------------------------------------------------------------------

#[tokio::test]
async fn callback_for_cancelled_job_is_ignored() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;
    test.state
        .registries
        .tracker
        .cancel_job(job.id, Some("operator"))
        .await
        .unwrap();

    let body = bytes(&result_body(&job, "completed"));
    let response = post_signed(test.app(), "/webhook/results", ADMIN_KEY, ADMIN_SECRET, &body).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["applied"], false);
    assert_eq!(json["data"]["status"], "cancelled");

    let stored = test.state.registries.tracker.get_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Test: a non-retryable error callback fails the job and records history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn error_callback_fails_job() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;

    let payload = json!({
        "jobId": job.id,
        "dealName": DEAL,
        "errorType": "extraction_failed",
        "errorMessage": "Could not parse page 3",
        "timestamp": Utc::now(),
        "retryable": false,
    });
    let response = post_signed(test.app(), "/webhook/errors", ADMIN_KEY, ADMIN_SECRET, &bytes(&payload)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let stored = test.state.registries.tracker.get_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("extraction_failed: Could not parse page 3")
    );

    let history = test.state.registries.queue.history_for(DEAL, None).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, HistoryKind::Error);
}

// ---------------------------------------------------------------------------
// Test: a retryable error leaves the job running and flags its items
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retryable_error_marks_items_retrying() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;

    let payload = json!({
        "jobId": job.id,
        "dealName": DEAL,
        "errorType": "rate_limited",
        "errorMessage": "OCR provider throttled",
        "timestamp": Utc::now(),
        "retryable": true,
    });
    let response = post_signed(test.app(), "/webhook/errors", ADMIN_KEY, ADMIN_SECRET, &bytes(&payload)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let stored = test.state.registries.tracker.get_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Processing);

    let items = test.state.registries.queue.query(&QueueFilter::default()).await;
    assert_eq!(items[0].status, QueueItemStatus::Retrying);
}

// ---------------------------------------------------------------------------
// Test: status query answers from the local tracker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_query_prefers_local_job() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, DEAL, &[RENT_ROLL]).await;

    let uri = format!("/webhook/status?jobId={}", job.id);
    let response = send_with_key(test.app(), Method::GET, &uri, ADMIN_KEY, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["source"], "local");
    assert_eq!(json["data"]["job"]["status"], "processing");

    let response = send_with_key(
        test.app(),
        Method::GET,
        "/webhook/status?dealName=Acme%20Tower",
        ADMIN_KEY,
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["job"]["id"], job.id.to_string());
}

// ---------------------------------------------------------------------------
// Test: status query needs a job id or deal name
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_query_without_parameters_returns_400() {
    let test = build_test_app(FakeEngine::new()).await;
    let response = send_with_key(test.app(), Method::GET, "/webhook/status", ADMIN_KEY, None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
