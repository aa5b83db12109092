use std::time::Duration;

use mesh_models::EMBEDDING_DIMENSION;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::EmbeddingError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct EmbedRequestBody<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponseBody {
    embedding: Vec<f32>,
}

pub struct EmbeddingAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EmbeddingAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// `embed(text) -> vector<float,1536>`. Retries
    /// transient faults up to `MAX_ATTEMPTS` with jittered exponential
    /// backoff; `invalid_api_key` fails on the first attempt.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut last_error = EmbeddingError::ServiceUnavailable;

        for attempt in 0..MAX_ATTEMPTS {
            match self.call(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, "embedding call failed, retrying");
                    last_error = err;
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff_for(attempt)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn call(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = EmbedRequestBody { input: text };

        let response = tokio::time::timeout(
            CALL_TIMEOUT,
            self.client.post(&url).bearer_auth(&self.api_key).json(&body).send(),
        )
        .await
        .map_err(|_| EmbeddingError::ServiceUnavailable)?
        .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let parsed: EmbedResponseBody = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::Request(e.to_string()))?;
                if parsed.embedding.len() != EMBEDDING_DIMENSION {
                    return Err(EmbeddingError::InvalidDimension {
                        expected: EMBEDDING_DIMENSION,
                        actual: parsed.embedding.len(),
                    });
                }
                Ok(parsed.embedding)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(EmbeddingError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(EmbeddingError::RateLimited { retry_after })
            }
            status if status.is_server_error() => Err(EmbeddingError::ServiceUnavailable),
            status => Err(EmbeddingError::Request(format!("unexpected status {status}"))),
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let base = BASE_BACKOFF * 2u32.pow(attempt);
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2 + 1);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base_url: String) -> EmbeddingAdapter {
        EmbeddingAdapter::new(reqwest::Client::new(), base_url, "test-key")
    }

    #[tokio::test]
    async fn successful_call_returns_the_embedding() {
        let server = MockServer::start().await;
        let embedding = vec![0.1f32; EMBEDDING_DIMENSION];
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": embedding })))
            .expect(1)
            .mount(&server)
            .await;

        let result = adapter(server.uri()).embed("nginx 1.18").await.unwrap();
        assert_eq!(result.len(), EMBEDDING_DIMENSION);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [0.1, 0.2] })))
            .expect(1)
            .mount(&server)
            .await;

        let err = adapter(server.uri()).embed("short").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidDimension { actual: 2, .. }));
    }

    #[tokio::test]
    async fn unauthorized_fails_on_first_attempt_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = adapter(server.uri()).embed("anything").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidApiKey));
    }

    #[tokio::test]
    async fn server_error_is_retried_up_to_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .expect(MAX_ATTEMPTS as u64)
            .mount(&server)
            .await;

        let err = adapter(server.uri()).embed("anything").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ServiceUnavailable));
    }
}
