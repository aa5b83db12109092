//! The thin typed store surface the graph, vector and job operations depend
//! on, decoupled from any concrete backend. Two implementations —
//! `LibsqlStore` (production) and `MemoryStore` (test fake) — satisfy every
//! trait here, and the workspace's integration tests run against both
//! (`tests/store_contract.rs`).

use async_trait::async_trait;
use mesh_models::{Job, JobFilter, JobOrderBy, JobState};

use crate::errors::StoreError;
use crate::types::{GraphQuery, HostSummary, HostView, Page, SimilarResult, UpsertBatch, UpsertSummary};

/// Upsert and depth/graph query surface.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert(&self, batch: UpsertBatch) -> Result<UpsertSummary, StoreError>;

    async fn host_view(&self, ip: &str, depth: u8) -> Result<Option<HostView>, StoreError>;

    async fn graph_query(
        &self,
        query: GraphQuery,
        limit: u32,
        offset: u32,
    ) -> Result<Page<HostSummary>, StoreError>;
}

/// Vector k-NN over `VulnDoc.embedding`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn similar(
        &self,
        embedding: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<SimilarResult>, StoreError>;
}

/// Job persistence and the state machine's sole mutator, `advance`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, scanner_key: Option<String>) -> Result<Job, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn advance(
        &self,
        id: &str,
        target: JobState,
        error: Option<String>,
        host_count: Option<u32>,
        port_count: Option<u32>,
    ) -> Result<Job, StoreError>;

    async fn list(
        &self,
        filter: JobFilter,
        order_by: JobOrderBy,
        desc: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Page<Job>, StoreError>;
}

/// Backing persistence for the workflow engine's at-most-once step
/// completion: on replay the workflow adapter checks here before re-running
/// a step's side effect.
#[async_trait]
pub trait WorkflowStepStore: Send + Sync {
    async fn get_step_result(
        &self,
        workflow_key: &str,
        step_name: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    async fn put_step_result(
        &self,
        workflow_key: &str,
        step_name: &str,
        result: &serde_json::Value,
    ) -> Result<(), StoreError>;
}

/// The full set of capabilities a mesh-store backend provides.
pub trait Store: GraphStore + VectorIndex + JobStore + WorkflowStepStore {}
impl<T: GraphStore + VectorIndex + JobStore + WorkflowStepStore> Store for T {}
