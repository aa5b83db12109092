use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::SigningKey;
use mesh_api::{routes, AppState};
use mesh_embedding::EmbeddingAdapter;
use mesh_enrichment::{AsnAdapter, CpeAdapter, GeoIpAdapter};
use mesh_security::{RateLimiter, SystemClock};
use mesh_store::{MemoryStore, Store};
use mesh_workflow::WorkflowEngine;
use rand::rngs::OsRng;

/// Base URL for an address nothing listens on: connections refuse instantly,
/// so enrichment adapters degrade to missing-enrichment without waiting out
/// their call timeout.
const DEAD_ENRICHMENT_URL: &str = "http://127.0.0.1:1";

pub fn test_state(ingest_rate_per_min: u32, query_rate_per_min: u32) -> AppState {
    test_state_with_embedding_url(ingest_rate_per_min, query_rate_per_min, DEAD_ENRICHMENT_URL)
}

/// Like `test_state`, but points the embedding adapter at `embedding_base_url`
/// instead of the dead address, so a `wiremock` server can stand in for the
/// embedding provider in tests that exercise `/v1/query/similar`.
pub fn test_state_with_embedding_url(
    ingest_rate_per_min: u32,
    query_rate_per_min: u32,
    embedding_base_url: &str,
) -> AppState {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let client = reqwest::Client::new();

    let workflow = Arc::new(WorkflowEngine::new(
        Arc::clone(&store),
        Arc::new(AsnAdapter::new(client.clone(), DEAD_ENRICHMENT_URL)),
        Arc::new(GeoIpAdapter::new(client.clone(), DEAD_ENRICHMENT_URL)),
        Arc::new(CpeAdapter::new(client.clone(), DEAD_ENRICHMENT_URL)),
    ));

    AppState {
        store,
        workflow,
        embedding: Arc::new(EmbeddingAdapter::new(client, embedding_base_url, "test-key")),
        ingest_limiter: Arc::new(RateLimiter::new(ingest_rate_per_min, SystemClock)),
        query_limiter: Arc::new(RateLimiter::new(query_rate_per_min, SystemClock)),
        clock_skew_seconds: 300,
        dispatch_reaper_age_seconds: 60,
        workflow_queue_depth_threshold: 256,
    }
}

pub fn test_router(state: AppState) -> Router {
    routes::build_router(state)
}

/// Inserts a `ConnectInfo` extension the way a real listener bound with
/// `into_make_service_with_connect_info` would, since a bare `oneshot` call
/// never goes through an actual TCP accept loop.
pub fn with_connect_info(mut req: Request<Body>) -> Request<Body> {
    let addr: SocketAddr = "127.0.0.1:54321".parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

pub struct SignedEnvelope {
    pub public_key_b64: String,
    pub signature_b64: String,
    pub timestamp: i64,
    pub data: String,
}

pub fn sign_envelope(data: &str, timestamp: i64) -> SignedEnvelope {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_b64 = BASE64.encode(signing_key.verifying_key().to_bytes());
    let signature_b64 = mesh_security::envelope::sign(data.as_bytes(), timestamp, &signing_key);
    SignedEnvelope {
        public_key_b64,
        signature_b64,
        timestamp,
        data: data.to_string(),
    }
}
