mod common;

use std::collections::BTreeSet;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use mesh_store::{EnrichedHost, EnrichedPort, EnrichedService, GraphStore, Protocol, UpsertBatch};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{test_router, test_state, with_connect_info};

fn host_batch(ip: &str) -> UpsertBatch {
    UpsertBatch {
        scan_id: "scan-graph-1".into(),
        contributor_id: "contributor-1".into(),
        observed_at: Utc::now(),
        hosts: vec![EnrichedHost {
            ip: ip.into(),
            asn: Some(64512),
            asn_org: Some("Shared Org".into()),
            city: None,
            region: None,
            country: None,
            cloud_region: None,
            ports: vec![EnrichedPort {
                number: 22,
                protocol: Protocol::Tcp,
                services: vec![EnrichedService {
                    name: "ssh".into(),
                    product: None,
                    version: None,
                    cpe: BTreeSet::new(),
                }],
            }],
        }],
    }
}

#[tokio::test]
async fn by_asn_pagination_walks_every_offset_with_has_more() {
    let state = test_state(60, 30);
    for ip in ["198.51.100.1", "198.51.100.2", "198.51.100.3", "198.51.100.4"] {
        state.store.upsert(host_batch(ip)).await.unwrap();
    }

    let router = test_router(state);

    let mut seen = Vec::new();
    let mut offset = 0u32;
    loop {
        let req = with_connect_info(
            Request::builder()
                .method("POST")
                .uri("/v1/query/graph")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"query_type": "by_asn", "asn": 64512, "limit": 1, "offset": offset}).to_string(),
                ))
                .unwrap(),
        );
        let response = router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page: Value = serde_json::from_slice(&body).unwrap();

        let items = page["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        seen.push(items[0]["ip"].as_str().unwrap().to_string());

        assert_eq!(page["total"], 4);
        let has_more = page["has_more"].as_bool().unwrap();
        if !has_more {
            assert!(page["next_offset"].is_null());
            break;
        }
        offset = page["next_offset"].as_u64().unwrap() as u32;
    }

    seen.sort();
    assert_eq!(seen, vec!["198.51.100.1", "198.51.100.2", "198.51.100.3", "198.51.100.4"]);
}

#[tokio::test]
async fn host_view_depth_out_of_range_is_rejected() {
    let state = test_state(60, 30);
    state.store.upsert(host_batch("198.51.100.9")).await.unwrap();
    let router = test_router(state);

    let req = with_connect_info(
        Request::builder()
            .method("GET")
            .uri("/v1/query/host/198.51.100.9?depth=6")
            .body(Body::empty())
            .unwrap(),
    );
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn host_view_at_depth_zero_omits_ports() {
    let state = test_state(60, 30);
    state.store.upsert(host_batch("198.51.100.10")).await.unwrap();
    let router = test_router(state);

    let req = with_connect_info(
        Request::builder()
            .method("GET")
            .uri("/v1/query/host/198.51.100.10")
            .body(Body::empty())
            .unwrap(),
    );
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let view: Value = serde_json::from_slice(&body).unwrap();
    assert!(view["ports"].is_null());
}

#[tokio::test]
async fn unknown_host_returns_404() {
    let state = test_state(60, 30);
    let router = test_router(state);

    let req = with_connect_info(
        Request::builder()
            .method("GET")
            .uri("/v1/query/host/203.0.113.250")
            .body(Body::empty())
            .unwrap(),
    );
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
