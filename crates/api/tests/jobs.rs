//! Integration tests for `/api/v1/jobs`.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::{body_json, build_test_app, get_as_admin, post_as_admin, seed_processing_job, FakeEngine};
use docrelay_core::scheduling::JobStatus;
use docrelay_store::models::queue_item::{QueueFilter, QueueItemStatus};

// ---------------------------------------------------------------------------
// Test: a failed job can be retried until its budget is spent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_requeues_failed_job_then_rejects_at_limit() {
    let test = build_test_app(FakeEngine::new()).await;
    let tracker = &test.state.registries.tracker;
    let job = seed_processing_job(&test.state, "Acme Tower", &["/deals/acme/rent_roll.pdf"]).await;

    tracker.record_attempt_failure(job.id, "gateway timeout").await.unwrap();
    tracker.record_attempt_failure(job.id, "gateway timeout").await.unwrap();
    let failed = tracker.fail_job(job.id, "engine rejected the request").await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 2);

    let uri = format!("/api/v1/jobs/{}/retry", job.id);
    let response = post_as_admin(test.app(), &uri, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "queued");
    assert_eq!(json["data"]["retry_count"], 3);

    let items = test.state.registries.queue.query(&QueueFilter::default()).await;
    assert_eq!(items[0].status, QueueItemStatus::Retrying);

    // The job is queued now and its budget is spent either way.
    let response = post_as_admin(test.app(), &uri, json!({})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn retry_of_active_job_returns_409() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, "Acme Tower", &["/deals/acme/t12.xlsx"]).await;

    let response = post_as_admin(test.app(), &format!("/api/v1/jobs/{}/retry", job.id), json!({})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let job = test.state.registries.tracker.get_job(job.id).await.unwrap();
    assert_eq!(job.retry_count, 0);
}

// ---------------------------------------------------------------------------
// Test: cancel stops the job and fails its queue items
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_marks_job_cancelled() {
    let test = build_test_app(FakeEngine::new()).await;
    let job = seed_processing_job(&test.state, "Acme Tower", &["/deals/acme/om.pdf"]).await;

    let uri = format!("/api/v1/jobs/{}/cancel?reason=duplicate%20upload", job.id);
    let response = post_as_admin(test.app(), &uri, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "cancelled");

    let items = test.state.registries.queue.query(&QueueFilter::default()).await;
    assert!(items.iter().all(|i| i.status == QueueItemStatus::Failed));

    let response = post_as_admin(test.app(), &uri, json!({})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Test: reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_unknown_job_returns_404() {
    let test = build_test_app(FakeEngine::new()).await;
    let response = get_as_admin(
        test.app(),
        "/api/v1/jobs/00000000-0000-0000-0000-000000000000",
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_by_status() {
    let test = build_test_app(FakeEngine::new()).await;
    let active = seed_processing_job(&test.state, "Acme Tower", &["/deals/acme/a.pdf"]).await;
    let cancelled = seed_processing_job(&test.state, "Beacon Plaza", &["/deals/beacon/b.pdf"]).await;
    test.state
        .registries
        .tracker
        .cancel_job(cancelled.id, None)
        .await
        .unwrap();

    let json = body_json(get_as_admin(test.app(), "/api/v1/jobs?status=processing").await).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["items"][0]["id"], active.id.to_string());

    let json = body_json(get_as_admin(test.app(), "/api/v1/jobs/summary").await).await;
    assert_eq!(json["data"]["total"], 2);
    assert_eq!(json["data"]["by_status"]["processing"], 1);
    assert_eq!(json["data"]["by_status"]["cancelled"], 1);
    assert_eq!(json["data"]["by_status"]["completed"], 0);
}

// ---------------------------------------------------------------------------
// Test: cleanup removes only finished jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_removes_terminal_jobs() {
    let test = build_test_app(FakeEngine::new()).await;
    let tracker = &test.state.registries.tracker;
    let active = seed_processing_job(&test.state, "Acme Tower", &["/deals/acme/a.pdf"]).await;
    let done = seed_processing_job(&test.state, "Beacon Plaza", &["/deals/beacon/b.pdf"]).await;
    tracker.cancel_job(done.id, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let response = post_as_admin(test.app(), "/api/v1/jobs/cleanup?age_hours=0", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["removed"], 1);
    assert_eq!(json["data"]["age_hours"], 0);

    assert!(tracker.get_job(done.id).await.is_none());
    assert!(tracker.get_job(active.id).await.is_some());
}

#[tokio::test]
async fn cleanup_rejects_negative_age() {
    let test = build_test_app(FakeEngine::new()).await;
    let response = post_as_admin(test.app(), "/api/v1/jobs/cleanup?age_hours=-1", json!({})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
