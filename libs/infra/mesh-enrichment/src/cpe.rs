use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{Cache, CacheHit};
use crate::errors::FetchError;

const POSITIVE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const NEGATIVE_TTL: Duration = Duration::from_secs(30 * 60);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct CpeRequestBody<'a> {
    name: &'a str,
    product: Option<&'a str>,
    version: Option<&'a str>,
}

#[derive(Deserialize)]
struct CpeResponseBody {
    cpe: Vec<String>,
}

fn cache_key(name: &str, product: Option<&str>, version: Option<&str>) -> String {
    format!("{name}\u{0}{}\u{0}{}", product.unwrap_or(""), version.unwrap_or(""))
}

/// `(name, product, version)` → set of CPE identifiers. Has
/// the longest positive TTL of the three adapters because product/version
/// catalogs change far less often than network topology.
pub struct CpeAdapter {
    client: reqwest::Client,
    base_url: String,
    cache: Cache<String, BTreeSet<String>>,
}

impl CpeAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            cache: Cache::new(POSITIVE_TTL, NEGATIVE_TTL),
        }
    }

    pub async fn lookup(
        &self,
        name: &str,
        product: Option<&str>,
        version: Option<&str>,
        cancelled: &AtomicBool,
    ) -> BTreeSet<String> {
        let key = cache_key(name, product, version);
        if let Some(hit) = self.cache.get(&key) {
            return match hit {
                CacheHit::Positive(cpe) => cpe,
                CacheHit::Negative => BTreeSet::new(),
            };
        }

        match self.fetch(name, product, version, cancelled).await {
            Ok(cpe) => {
                self.cache.put_positive(key, cpe.clone());
                cpe
            }
            Err(err) => {
                warn!(name, error = %err, "cpe lookup failed, degrading to missing enrichment");
                self.cache.put_negative(key);
                BTreeSet::new()
            }
        }
    }

    async fn fetch(
        &self,
        name: &str,
        product: Option<&str>,
        version: Option<&str>,
        cancelled: &AtomicBool,
    ) -> Result<BTreeSet<String>, FetchError> {
        if cancelled.load(Ordering::Relaxed) {
            return Err(FetchError::Cancelled);
        }

        let url = format!("{}/cpe", self.base_url.trim_end_matches('/'));
        let body = CpeRequestBody { name, product, version };
        let response = tokio::time::timeout(CALL_TIMEOUT, self.client.post(&url).json(&body).send())
            .await
            .map_err(|_| FetchError::TimedOut)??;

        if !response.status().is_success() {
            return Err(FetchError::BadStatus(response.status()));
        }

        let parsed: CpeResponseBody = response.json().await?;
        Ok(parsed.cpe.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_lookup_returns_cpe_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cpe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cpe": ["cpe:2.3:a:nginx:nginx:1.18.0:*:*:*:*:*:*:*"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = CpeAdapter::new(reqwest::Client::new(), server.uri());
        let cancelled = AtomicBool::new(false);

        let cpe = adapter.lookup("http", Some("nginx"), Some("1.18.0"), &cancelled).await;
        assert_eq!(cpe.len(), 1);
    }

    #[test]
    fn cache_key_distinguishes_product_and_version() {
        assert_ne!(cache_key("http", Some("nginx"), Some("1.18")), cache_key("http", Some("nginx"), Some("1.19")));
        assert_ne!(cache_key("http", None, None), cache_key("http", Some("nginx"), None));
    }
}
