use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A host identified by IP address, enriched with location and ASN data.
///
/// `first_seen <= last_seen` always holds; `last_seen` only moves forward
/// under the upserter's `max(existing, observed_at)` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub cloud_region: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Host {
    /// Builds the host as first observed: `first_seen == last_seen == observed_at`.
    pub fn new_observed(ip: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            ip: ip.into(),
            asn: None,
            asn_org: None,
            city: None,
            region: None,
            country: None,
            cloud_region: None,
            first_seen: observed_at,
            last_seen: observed_at,
        }
    }
}

/// Summary view of a host returned from graph traversal queries, not
/// the full `Host` record — callers get the scalar attributes plus whatever
/// the query's depth/traversal mode surfaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSummary {
    pub ip: String,
    pub asn: Option<u32>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub last_seen: DateTime<Utc>,
}
