use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for the embedding adapter: `invalid_api_key` is a
/// configuration fault and never retried; `service_unavailable` and
/// `rate_limited` are transient and retried by `embed()` itself.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding service rejected the configured api key")]
    InvalidApiKey,

    #[error("embedding service unavailable")]
    ServiceUnavailable,

    #[error("embedding service rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding response had {actual} dimensions, expected {expected}")]
    InvalidDimension { expected: usize, actual: usize },
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::ServiceUnavailable | EmbeddingError::RateLimited { .. })
    }
}
