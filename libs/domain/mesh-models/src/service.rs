use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A service running on a port, deduplicated by `fingerprint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub fingerprint: String,
    pub name: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub cpe: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Service {
    /// Stable hash of `(name, product, version)`, used to deduplicate
    /// services observed across resubmissions.
    pub fn compute_fingerprint(name: &str, product: Option<&str>, version: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(product.unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(version.unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn new_observed(
        name: impl Into<String>,
        product: Option<String>,
        version: Option<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        let fingerprint = Self::compute_fingerprint(&name, product.as_deref(), version.as_deref());
        Self {
            fingerprint,
            name,
            product,
            version,
            cpe: BTreeSet::new(),
            first_seen: observed_at,
            last_seen: observed_at,
        }
    }
}

/// Content-addressed service banner. Identity is the hash of `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Banner {
    pub hash: String,
    pub content: String,
}

impl Banner {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let hash = hex::encode(Sha256::digest(content.as_bytes()));
        Self { hash, content }
    }
}

/// Content-addressed TLS certificate. Identity is the certificate's own
/// SHA-256 fingerprint, supplied by the caller rather than recomputed here
/// (the scanner already reports the certificate hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsCert {
    pub sha256: String,
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub not_after: Option<DateTime<Utc>>,
}
