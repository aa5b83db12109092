//! Route topology, nested under `/v1`. Ingest gets its own body-size
//! limit layer since only that route needs the 10 MiB ceiling.

use std::time::Duration;

use axum::http::{header, Method};
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, ingest, jobs, query};
use crate::middleware::{ingest_deadline, query_deadline, similarity_deadline};
use crate::state::AppState;

const MAX_INGEST_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let ingest_route = Router::new()
        .route("/v1/mesh/ingest", post(ingest::ingest))
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(MAX_INGEST_BODY_BYTES)))
        .layer(axum_middleware::from_fn(ingest_deadline));

    let job_routes = Router::new()
        .route("/v1/jobs/:id", get(jobs::get_job))
        .route("/v1/jobs", get(jobs::list_jobs));

    let host_and_graph_routes = Router::new()
        .route("/v1/query/host/:ip", get(query::host_view))
        .route("/v1/query/graph", post(query::graph_query))
        .layer(axum_middleware::from_fn(query_deadline));

    let similarity_routes = Router::new()
        .route("/v1/query/similar", post(query::similar))
        .layer(axum_middleware::from_fn(similarity_deadline));

    Router::new()
        .route("/health", get(health::health))
        .merge(ingest_route)
        .merge(job_routes)
        .merge(host_and_graph_routes)
        .merge(similarity_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
