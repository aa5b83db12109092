//! Background daemon promoting stuck `pending` jobs to `failed(dispatch)`.
//! The ingest fast path accepts that workflow submission might fail
//! silently; this sweep is what actually closes out a job that never
//! started processing.

use chrono::Utc;
use mesh_models::{JobFilter, JobOrderBy, JobState};
use tracing::warn;

use crate::state::AppState;

const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub async fn run(state: AppState) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(err) = sweep_once(&state).await {
            warn!(error = %err, "dispatch reaper sweep failed");
        }
    }
}

async fn sweep_once(state: &AppState) -> Result<(), mesh_store::StoreError> {
    let page = state
        .store
        .list(
            JobFilter {
                scanner_key: None,
                state: Some(JobState::Pending),
            },
            JobOrderBy::CreatedAt,
            false,
            500,
            0,
        )
        .await?;

    let now = Utc::now();
    for job in page.items {
        let age = (now - job.created_at).num_seconds();
        if age > state.dispatch_reaper_age_seconds {
            warn!(job_id = %job.id, age, "reaping stale pending job");
            state
                .store
                .advance(&job.id, JobState::Failed, Some("dispatch".to_string()), None, None)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mesh_embedding::EmbeddingAdapter;
    use mesh_enrichment::{AsnAdapter, CpeAdapter, GeoIpAdapter};
    use mesh_security::{RateLimiter, SystemClock};
    use mesh_store::MemoryStore;
    use mesh_workflow::WorkflowEngine;

    fn test_state(dispatch_reaper_age_seconds: i64) -> AppState {
        let store: Arc<dyn mesh_store::Store> = Arc::new(MemoryStore::new());
        let client = reqwest::Client::new();
        let workflow = Arc::new(WorkflowEngine::new(
            Arc::clone(&store),
            Arc::new(AsnAdapter::new(client.clone(), "http://localhost")),
            Arc::new(GeoIpAdapter::new(client.clone(), "http://localhost")),
            Arc::new(CpeAdapter::new(client.clone(), "http://localhost")),
        ));
        AppState {
            store,
            workflow,
            embedding: Arc::new(EmbeddingAdapter::new(client, "http://localhost", "")),
            ingest_limiter: Arc::new(RateLimiter::new(60, SystemClock)),
            query_limiter: Arc::new(RateLimiter::new(30, SystemClock)),
            clock_skew_seconds: 300,
            dispatch_reaper_age_seconds,
            workflow_queue_depth_threshold: 256,
        }
    }

    #[tokio::test]
    async fn reaps_jobs_stuck_pending_past_the_age_threshold() {
        let state = test_state(-1);
        let job = state.store.create(Some("k1".into())).await.unwrap();

        sweep_once(&state).await.unwrap();

        let fetched = state.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, JobState::Failed);
        assert_eq!(fetched.error.as_deref(), Some("dispatch"));
    }

    #[tokio::test]
    async fn leaves_fresh_pending_jobs_alone() {
        let state = test_state(3600);
        let job = state.store.create(Some("k1".into())).await.unwrap();

        sweep_once(&state).await.unwrap();

        let fetched = state.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, JobState::Pending);
    }
}
