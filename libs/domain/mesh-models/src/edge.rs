use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The directed relations in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    Has,
    Runs,
    EvidencedBy,
    AffectedBy,
    InCity,
    InRegion,
    InCountry,
    InAsn,
    InCloudRegion,
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Relation::Has => "HAS",
            Relation::Runs => "RUNS",
            Relation::EvidencedBy => "EVIDENCED_BY",
            Relation::AffectedBy => "AFFECTED_BY",
            Relation::InCity => "IN_CITY",
            Relation::InRegion => "IN_REGION",
            Relation::InCountry => "IN_COUNTRY",
            Relation::InAsn => "IN_ASN",
            Relation::InCloudRegion => "IN_CLOUD_REGION",
        };
        write!(f, "{s}")
    }
}

/// A relationship edge between two graph nodes, identified by their string
/// keys (host ip, port identity string, service fingerprint, etc).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub relation: Relation,
    pub from: String,
    pub to: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A time-stamped observation: records *that* a service was seen by *whom*,
/// appended on every upsert and never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationEdge {
    pub scan_id: String,
    pub contributor_id: String,
    pub host_ip: String,
    pub port_number: u16,
    pub service_fingerprint: String,
    pub observed_at: DateTime<Utc>,
    pub trust: f32,
}
