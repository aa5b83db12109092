//! GET `/v1/jobs/{id}` and GET `/v1/jobs` — read-only views over the job
//! state machine. Neither handler mutates a job; only the workflow and the
//! dispatch reaper call `advance`.

use axum::extract::{Path, Query, State};
use axum::Json;
use mesh_models::{Job, JobFilter, JobOrderBy, JobState};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    let job = state.store.get(&id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    #[serde(default)]
    pub scanner_key: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub desc: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct JobsPage {
    pub items: Vec<Job>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
    pub next_offset: Option<u32>,
}

pub async fn list_jobs(State(state): State<AppState>, Query(params): Query<ListJobsParams>) -> Result<Json<JobsPage>, ApiError> {
    if params.limit == 0 || params.limit > 500 {
        return Err(ApiError::LimitOutOfRange("limit must be in 1..=500".into()));
    }

    let state_filter = match params.state.as_deref() {
        None => None,
        Some("pending") => Some(JobState::Pending),
        Some("processing") => Some(JobState::Processing),
        Some("completed") => Some(JobState::Completed),
        Some("failed") => Some(JobState::Failed),
        Some(other) => return Err(ApiError::Malformed(format!("unknown job state `{other}`"))),
    };

    let order_by = match params.order_by.as_deref() {
        None | Some("created_at") => JobOrderBy::CreatedAt,
        Some("updated_at") => JobOrderBy::UpdatedAt,
        Some(other) => return Err(ApiError::Malformed(format!("unknown order_by `{other}`"))),
    };
    let desc = params.desc.unwrap_or(true);

    let page = state
        .store
        .list(
            JobFilter {
                scanner_key: params.scanner_key,
                state: state_filter,
            },
            order_by,
            desc,
            params.limit,
            params.offset,
        )
        .await?;

    let next_offset = if page.has_more { Some(params.offset + page.items.len() as u32) } else { None };

    Ok(Json(JobsPage {
        items: page.items,
        total: page.total,
        limit: params.limit,
        offset: params.offset,
        has_more: page.has_more,
        next_offset,
    }))
}
