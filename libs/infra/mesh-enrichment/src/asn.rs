use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::cache::{Cache, CacheHit};
use crate::errors::FetchError;

const POSITIVE_TTL: Duration = Duration::from_secs(24 * 3600);
const NEGATIVE_TTL: Duration = Duration::from_secs(5 * 60);
const CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsnRecord {
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
}

impl AsnRecord {
    pub fn missing() -> Self {
        Self::default()
    }
}

#[derive(Deserialize)]
struct AsnResponseBody {
    asn: Option<u32>,
    org: Option<String>,
}

/// IP → ASN/org lookups. Isolated failure: `lookup` never
/// returns an error, only a (possibly empty) `AsnRecord`.
pub struct AsnAdapter {
    client: reqwest::Client,
    base_url: String,
    cache: Cache<String, AsnRecord>,
}

impl AsnAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            cache: Cache::new(POSITIVE_TTL, NEGATIVE_TTL),
        }
    }

    pub async fn lookup(&self, ip: &str, cancelled: &AtomicBool) -> AsnRecord {
        if let Some(hit) = self.cache.get(&ip.to_string()) {
            return match hit {
                CacheHit::Positive(record) => record,
                CacheHit::Negative => AsnRecord::missing(),
            };
        }

        match self.fetch(ip, cancelled).await {
            Ok(record) => {
                self.cache.put_positive(ip.to_string(), record.clone());
                record
            }
            Err(err) => {
                warn!(ip, error = %err, "asn lookup failed, degrading to missing enrichment");
                self.cache.put_negative(ip.to_string());
                AsnRecord::missing()
            }
        }
    }

    async fn fetch(&self, ip: &str, cancelled: &AtomicBool) -> Result<AsnRecord, FetchError> {
        if cancelled.load(Ordering::Relaxed) {
            return Err(FetchError::Cancelled);
        }

        let url = format!("{}/asn/{ip}", self.base_url.trim_end_matches('/'));
        let response = tokio::time::timeout(CALL_TIMEOUT, self.client.get(&url).send())
            .await
            .map_err(|_| FetchError::TimedOut)??;

        if !response.status().is_success() {
            return Err(FetchError::BadStatus(response.status()));
        }

        let body: AsnResponseBody = response.json().await?;
        Ok(AsnRecord {
            asn: body.asn,
            asn_org: body.org,
        })
    }
}
