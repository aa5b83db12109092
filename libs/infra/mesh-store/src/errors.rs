use thiserror::Error;

/// Error catalog for every store operation, shared by the libsql
/// implementation and the in-memory test fake so callers (the graph, vector
/// and job handlers, the workflow adapter) branch on the same variants
/// regardless of backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("not found")]
    NotFound,

    #[error("invalid state transition")]
    InvalidTransition,

    #[error("embedding has {actual} dimensions, expected {expected}")]
    InvalidEmbeddingDimension { expected: usize, actual: usize },

    #[error("vector index is empty")]
    EmptyIndex,
}

impl From<libsql::Error> for StoreError {
    fn from(err: libsql::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}
