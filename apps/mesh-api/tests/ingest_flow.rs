mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use mesh_store::JobStore;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{sign_envelope, test_router, test_state, with_connect_info};

fn scan_payload() -> String {
    json!({
        "scan_id": "scan-e2e-1",
        "scanner_id": "scanner-1",
        "target": "203.0.113.99/32",
        "hosts": [{
            "ip": "203.0.113.99",
            "ports": [{"number": 443, "protocol": "tcp"}]
        }]
    })
    .to_string()
}

#[tokio::test]
async fn valid_ingest_completes_and_is_visible_in_host_view() {
    let state = test_state(60, 30);
    let router = test_router(state.clone());

    let now = Utc::now().timestamp();
    let envelope = sign_envelope(&scan_payload(), now);

    let ingest_req = Request::builder()
        .method("POST")
        .uri("/v1/mesh/ingest")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "data": envelope.data,
                "public_key": envelope.public_key_b64,
                "signature": envelope.signature_b64,
                "timestamp": envelope.timestamp,
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.clone().oneshot(ingest_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let accepted: Value = serde_json::from_slice(&body).unwrap();
    let job_id = accepted["job_id"].as_str().unwrap().to_string();
    assert_eq!(accepted["status"], "accepted");

    let mut job = None;
    for _ in 0..50 {
        let fetched = state.store.get(&job_id).await.unwrap().unwrap();
        if fetched.state.is_terminal() {
            job = Some(fetched);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let job = job.expect("workflow did not reach a terminal state in time");
    assert_eq!(job.state, mesh_models::JobState::Completed);
    assert_eq!(job.host_count, 1);
    assert_eq!(job.port_count, 1);

    let host_req = with_connect_info(
        Request::builder()
            .method("GET")
            .uri("/v1/query/host/203.0.113.99?depth=2")
            .body(Body::empty())
            .unwrap(),
    );
    let host_response = router.oneshot(host_req).await.unwrap();
    assert_eq!(host_response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(host_response.into_body(), usize::MAX).await.unwrap();
    let view: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(view["ip"], "203.0.113.99");
    assert_eq!(view["ports"][0]["number"], 443);
    assert_eq!(view["ports"][0]["services"][0]["name"], "https");
}

#[tokio::test]
async fn malformed_envelope_body_is_rejected_with_400() {
    let state = test_state(60, 30);
    let router = test_router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/mesh/ingest")
        .header("content-type", "application/json")
        .body(Body::from("{not valid json"))
        .unwrap();

    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"], "malformed");
}

#[tokio::test]
async fn tampered_signature_is_rejected_and_no_job_is_created() {
    let state = test_state(60, 30);
    let router = test_router(state.clone());

    let now = Utc::now().timestamp();
    let envelope = sign_envelope(&scan_payload(), now);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/mesh/ingest")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "data": format!("{} tampered", envelope.data),
                "public_key": envelope.public_key_b64,
                "signature": envelope.signature_b64,
                "timestamp": envelope.timestamp,
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let page = state
        .store
        .list(
            Default::default(),
            mesh_models::JobOrderBy::CreatedAt,
            true,
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 0);
}

#[tokio::test]
async fn ingest_rate_limit_rejects_the_61st_request_within_a_minute() {
    let state = test_state(60, 30);
    let router = test_router(state.clone());
    let now = Utc::now().timestamp();

    // Same signing key for every request: the bucket is per-identity
    // (the envelope's public key), so reusing one key is what actually
    // exercises the limiter rather than handing each request its own bucket.
    let envelope = sign_envelope(&scan_payload(), now);
    let body = json!({
        "data": envelope.data,
        "public_key": envelope.public_key_b64,
        "signature": envelope.signature_b64,
        "timestamp": envelope.timestamp,
    })
    .to_string();

    let mut last_status = StatusCode::OK;
    for _ in 0..61 {
        let req = Request::builder()
            .method("POST")
            .uri("/v1/mesh/ingest")
            .header("content-type", "application/json")
            .body(Body::from(body.clone()))
            .unwrap();
        last_status = router.clone().oneshot(req).await.unwrap().status();
    }

    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn saturated_workflow_queue_rejects_ingest_with_503() {
    let mut state = test_state(60, 30);
    state.workflow_queue_depth_threshold = 0;
    let router = test_router(state);

    let now = Utc::now().timestamp();
    let envelope = sign_envelope(&scan_payload(), now);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/mesh/ingest")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "data": envelope.data,
                "public_key": envelope.public_key_b64,
                "signature": envelope.signature_b64,
                "timestamp": envelope.timestamp,
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
