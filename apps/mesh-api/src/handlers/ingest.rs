//! Accepts a signed envelope, verifies it, rate-limits the contributor,
//! mints a job and hands off to the workflow engine — the fast path never
//! waits on parsing, enrichment or graph writes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use mesh_security::envelope;

use crate::error::{ApiError, MeshJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestEnvelope {
    /// Scanner output verbatim — either canonical JSON or line-delimited
    /// per-port records, handed to `mesh_parser::parse` unmodified.
    pub data: String,
    pub public_key: String,
    pub signature: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub job_id: String,
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: i64,
}

pub async fn ingest(
    State(state): State<AppState>,
    MeshJson(envelope): MeshJson<IngestEnvelope>,
) -> Result<(StatusCode, Json<IngestAccepted>), ApiError> {
    let now = Utc::now().timestamp();

    envelope::verify(
        envelope.data.as_bytes(),
        &envelope.public_key,
        &envelope.signature,
        envelope.timestamp,
        now,
        state.clock_skew_seconds,
    )?;

    state.ingest_limiter.check(&envelope.public_key)?;

    if state.workflow.in_flight() >= state.workflow_queue_depth_threshold {
        return Err(ApiError::ServiceUnavailable(
            "ingest pipeline is saturated, retry shortly".into(),
        ));
    }

    let job = state.store.create(Some(envelope.public_key.clone())).await?;
    info!(job_id = %job.id, contributor = %envelope.public_key, "ingest accepted");

    state.workflow.submit(job.id.clone(), envelope.public_key, envelope.data.into_bytes(), Utc::now());

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            job_id: job.id,
            status: "accepted",
            message: "job queued for enrichment",
            timestamp: now,
        }),
    ))
}
