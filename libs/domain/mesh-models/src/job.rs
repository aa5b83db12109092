use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of an ingest job. Transitions are restricted to
/// `pending -> processing`, `processing -> completed`, `processing -> failed`,
/// plus the fast-path `pending -> failed` used by the dispatch reaper.
/// Terminal states (`completed`, `failed`) never move again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    /// Whether `self -> target` is a permitted transition, per the state
    /// machine below.
    pub fn can_advance_to(self, target: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, target),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Public view of an ingest job, returned by `GET /v1/jobs/{id}` and
/// `GET /v1/jobs`. The time-ordered `id` doubles as the job store's
/// natural sort key, so pagination stays cursor-stable under concurrent
/// creates without a separate sequence column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub scanner_key: Option<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub host_count: u32,
    pub port_count: u32,
}

impl Job {
    pub fn new(id: String, scanner_key: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            scanner_key,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            host_count: 0,
            port_count: 0,
        }
    }
}

/// Ordering options for `list()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrderBy {
    CreatedAt,
    UpdatedAt,
}

/// Filter for `list()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub scanner_key: Option<String>,
    pub state: Option<JobState>,
}
