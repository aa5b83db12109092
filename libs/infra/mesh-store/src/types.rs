//! Shared request/response shapes for the store traits. These sit a level
//! below the public HTTP DTOs in `mesh-models`: they're what the graph,
//! vector and job operations pass across the store boundary, enriched with
//! whatever the enrichment and embedding adapters attached.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use mesh_models::{Severity, Vuln, VulnResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// A service as enriched by the CPE adapter, ready to upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedService {
    pub name: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub cpe: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPort {
    pub number: u16,
    pub protocol: Protocol,
    pub services: Vec<EnrichedService>,
}

/// A host as enriched by the ASN/GeoIP adapters, ready to upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedHost {
    pub ip: String,
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub cloud_region: Option<String>,
    pub ports: Vec<EnrichedPort>,
}

/// The full unit of work committed in one logical transaction: hosts then
/// ports then services then edges then observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertBatch {
    pub scan_id: String,
    pub contributor_id: String,
    pub observed_at: DateTime<Utc>,
    pub hosts: Vec<EnrichedHost>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub hosts_written: u32,
    pub ports_written: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceView {
    pub fingerprint: String,
    pub name: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub cpe: BTreeSet<String>,
    pub vulns: Option<Vec<Vuln>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortView {
    pub number: u16,
    pub protocol: Protocol,
    pub services: Option<Vec<ServiceView>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoChain {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
}

/// Depth-parametrised view of a host. Fields only
/// populate at or above the depth that names them; a depth-`k` response is
/// always a superset of the depth-`(k-1)` response for the same host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostView {
    pub ip: String,
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub cloud_region: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub ports: Option<Vec<PortView>>,
    pub geo_chain: Option<GeoChain>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSummary {
    pub ip: String,
    pub asn: Option<u32>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// The four indexed graph traversal modes, with precedence among
/// `by_location`'s optional fields resolved city > region > country (see
/// DESIGN.md for the open-question resolution).
#[derive(Debug, Clone, PartialEq)]
pub enum GraphQuery {
    ByAsn { asn: u32 },
    ByLocation {
        city: Option<String>,
        region: Option<String>,
        country: Option<String>,
    },
    ByVuln { cve: String },
    ByService {
        product: Option<String>,
        service: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub has_more: bool,
}

pub(crate) fn severity_from_str(s: &str) -> Severity {
    match s {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

pub(crate) fn cpe_to_json(cpe: &BTreeSet<String>) -> String {
    serde_json::to_string(cpe).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn cpe_from_json(s: &str) -> BTreeSet<String> {
    serde_json::from_str(s).unwrap_or_default()
}

pub type SimilarResult = VulnResult;
