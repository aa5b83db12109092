//! Text→vector embedding adapter with typed retryable/non-retryable
//! errors, feeding vector similarity search.

pub mod client;
pub mod errors;

pub use client::EmbeddingAdapter;
pub use errors::EmbeddingError;
