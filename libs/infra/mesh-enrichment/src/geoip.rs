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
pub struct GeoIpRecord {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl GeoIpRecord {
    pub fn missing() -> Self {
        Self::default()
    }
}

#[derive(Deserialize)]
struct GeoIpResponseBody {
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// IP → city/region/country/lat/lon lookups.
pub struct GeoIpAdapter {
    client: reqwest::Client,
    base_url: String,
    cache: Cache<String, GeoIpRecord>,
}

impl GeoIpAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            cache: Cache::new(POSITIVE_TTL, NEGATIVE_TTL),
        }
    }

    pub async fn lookup(&self, ip: &str, cancelled: &AtomicBool) -> GeoIpRecord {
        if let Some(hit) = self.cache.get(&ip.to_string()) {
            return match hit {
                CacheHit::Positive(record) => record,
                CacheHit::Negative => GeoIpRecord::missing(),
            };
        }

        match self.fetch(ip, cancelled).await {
            Ok(record) => {
                self.cache.put_positive(ip.to_string(), record.clone());
                record
            }
            Err(err) => {
                warn!(ip, error = %err, "geoip lookup failed, degrading to missing enrichment");
                self.cache.put_negative(ip.to_string());
                GeoIpRecord::missing()
            }
        }
    }

    async fn fetch(&self, ip: &str, cancelled: &AtomicBool) -> Result<GeoIpRecord, FetchError> {
        if cancelled.load(Ordering::Relaxed) {
            return Err(FetchError::Cancelled);
        }

        let url = format!("{}/geoip/{ip}", self.base_url.trim_end_matches('/'));
        let response = tokio::time::timeout(CALL_TIMEOUT, self.client.get(&url).send())
            .await
            .map_err(|_| FetchError::TimedOut)??;

        if !response.status().is_success() {
            return Err(FetchError::BadStatus(response.status()));
        }

        let body: GeoIpResponseBody = response.json().await?;
        Ok(GeoIpRecord {
            city: body.city,
            region: body.region,
            country: body.country,
            lat: body.lat,
            lon: body.lon,
        })
    }
}
