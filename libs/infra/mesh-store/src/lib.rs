//! Typed store abstraction over the graph/vector/job schema, with a
//! libsql-backed production implementation and an in-memory test fake that
//! satisfy the same trait surface.

pub mod client;
pub mod errors;
pub mod libsql_store;
pub mod memory_store;
pub mod schema;
pub mod traits;
pub mod types;

pub use client::StoreClient;
pub use errors::StoreError;
pub use libsql_store::LibsqlStore;
pub use memory_store::MemoryStore;
pub use traits::{GraphStore, JobStore, Store, VectorIndex, WorkflowStepStore};
pub use types::{
    EnrichedHost, EnrichedPort, EnrichedService, GeoChain, GraphQuery, HostSummary, HostView, Page, PortView,
    Protocol, ServiceView, SimilarResult, UpsertBatch, UpsertSummary,
};
