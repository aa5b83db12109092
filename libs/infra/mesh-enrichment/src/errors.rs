use thiserror::Error;

/// Internal fetch faults. Never surfaces past an adapter's `lookup`: a
/// failed lookup degrades to a missing-enrichment marker instead
/// rather than aborting the host the caller is enriching.
#[derive(Debug, Error)]
pub(crate) enum FetchError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned malformed body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("upstream call cancelled")]
    Cancelled,

    #[error("upstream call timed out")]
    TimedOut,

    #[error("upstream returned status {0}")]
    BadStatus(reqwest::StatusCode),
}
