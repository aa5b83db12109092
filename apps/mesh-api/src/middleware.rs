//! Per-request deadlines: every handler enforces an overall
//! deadline, propagated by simply bounding how long `next.run` is allowed
//! to take. On expiry the task unwinds and the caller gets `408` rather
//! than a partial response.

use std::time::Duration;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

async fn with_deadline(req: Request, next: Next, deadline: Duration) -> Response {
    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => ApiError::Timeout.into_response(),
    }
}

pub async fn ingest_deadline(req: Request, next: Next) -> Response {
    with_deadline(req, next, Duration::from_secs(5)).await
}

pub async fn query_deadline(req: Request, next: Next) -> Response {
    with_deadline(req, next, Duration::from_secs(5)).await
}

pub async fn similarity_deadline(req: Request, next: Next) -> Response {
    with_deadline(req, next, Duration::from_secs(10)).await
}
