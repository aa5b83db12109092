use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed dimensionality of every stored vulnerability embedding.
pub const EMBEDDING_DIMENSION: usize = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A known vulnerability. Owned by an out-of-scope ingester; the core only
/// reads these records when resolving `AFFECTED_BY` edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vuln {
    pub cve_id: String,
    pub cvss: f32,
    pub severity: Severity,
    pub kev_flag: bool,
}

/// The text + embedding record used for vector search. `embedding` is either
/// absent or present at the full dimension — a half-written embedding must
/// never be observable, so callers only ever see `Some(v)` where
/// `v.len() == EMBEDDING_DIMENSION`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnDoc {
    pub cve_id: String,
    pub title: String,
    pub summary: String,
    pub cpe: BTreeSet<String>,
    pub embedding: Option<Vec<f32>>,
    pub published_at: DateTime<Utc>,
}

impl VulnDoc {
    /// Validates the embedding dimensionality invariant before storage.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Result<Self, String> {
        if embedding.len() != EMBEDDING_DIMENSION {
            return Err(format!(
                "embedding has {} dimensions, expected {EMBEDDING_DIMENSION}",
                embedding.len()
            ));
        }
        self.embedding = Some(embedding);
        Ok(self)
    }
}

/// A single result from vector similarity search, joined with the
/// graph-side `Vuln` record by `cve_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnResult {
    pub cve_id: String,
    pub title: String,
    pub score: f32,
    pub severity: Option<Severity>,
    pub kev_flag: Option<bool>,
}
