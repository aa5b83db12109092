//! Shared application state, handed to every handler through axum's
//! `State` extractor: one `Arc`-wrapped struct holding the store handle,
//! rate limiters and adapter clients, cloned cheaply per request.

use std::sync::Arc;
use std::time::Duration;

use mesh_embedding::EmbeddingAdapter;
use mesh_enrichment::{AsnAdapter, CpeAdapter, GeoIpAdapter};
use mesh_security::{RateLimiter, SystemClock};
use mesh_store::Store;
use mesh_workflow::WorkflowEngine;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub workflow: Arc<WorkflowEngine>,
    pub embedding: Arc<EmbeddingAdapter>,
    pub ingest_limiter: Arc<RateLimiter<SystemClock>>,
    pub query_limiter: Arc<RateLimiter<SystemClock>>,
    pub clock_skew_seconds: i64,
    pub dispatch_reaper_age_seconds: i64,
    pub workflow_queue_depth_threshold: usize,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn Store>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builder never fails with these options");

        let asn = Arc::new(AsnAdapter::new(http_client.clone(), config.enrichment_base_url.clone()));
        let geoip = Arc::new(GeoIpAdapter::new(http_client.clone(), config.enrichment_base_url.clone()));
        let cpe = Arc::new(CpeAdapter::new(http_client.clone(), config.enrichment_base_url.clone()));

        let embedding = Arc::new(EmbeddingAdapter::new(
            http_client,
            config.embedding_base_url.clone(),
            config.embedding_api_key.clone(),
        ));

        let workflow = Arc::new(WorkflowEngine::new(Arc::clone(&store), asn, geoip, cpe));

        Self {
            store,
            workflow,
            embedding,
            ingest_limiter: Arc::new(RateLimiter::new(config.ingest_rate_per_min, SystemClock)),
            query_limiter: Arc::new(RateLimiter::new(config.query_rate_per_min, SystemClock)),
            clock_skew_seconds: config.clock_skew_seconds,
            dispatch_reaper_age_seconds: config.dispatch_reaper_age_seconds,
            workflow_queue_depth_threshold: config.workflow_queue_depth_threshold,
        }
    }
}
