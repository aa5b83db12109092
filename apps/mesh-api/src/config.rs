//! Process configuration, loaded from the environment after `dotenvy`
//! hydrates it from an optional `.env` file (`dotenv().ok()` then reads).

use clap::Parser;

#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[arg(long, env = "API_BIND", default_value = "0.0.0.0:8080")]
    pub api_bind: String,

    /// libsql/Turso connection URL, or a local file path, or `:memory:`.
    #[arg(long, env = "STORE_URL", default_value = ":memory:")]
    pub store_url: String,

    #[arg(long, env = "STORE_USER")]
    pub store_user: Option<String>,

    /// Auth token for a remote Turso database; ignored for local/in-memory stores.
    #[arg(long, env = "STORE_PASS")]
    pub store_pass: Option<String>,

    #[arg(long, env = "STORE_NAMESPACE")]
    pub store_namespace: Option<String>,

    #[arg(long, env = "STORE_DATABASE")]
    pub store_database: Option<String>,

    /// Base URL of the durable workflow engine. The in-process adapter in
    /// `mesh-workflow` doesn't call out to it yet, but the field is kept so
    /// swapping in a real engine doesn't require a config change.
    #[arg(long, env = "WORKFLOW_URL")]
    pub workflow_url: Option<String>,

    #[arg(long, env = "EMBEDDING_API_KEY", default_value = "")]
    pub embedding_api_key: String,

    #[arg(long, env = "EMBEDDING_BASE_URL", default_value = "https://api.example.invalid")]
    pub embedding_base_url: String,

    #[arg(long, env = "ENRICHMENT_BASE_URL", default_value = "https://enrichment.example.invalid")]
    pub enrichment_base_url: String,

    #[arg(long, env = "INGEST_RATE_PER_MIN", default_value_t = 60)]
    pub ingest_rate_per_min: u32,

    #[arg(long, env = "QUERY_RATE_PER_MIN", default_value_t = 30)]
    pub query_rate_per_min: u32,

    /// Freshness window for envelope timestamps.
    #[arg(long, env = "CLOCK_SKEW_SECONDS", default_value_t = 300)]
    pub clock_skew_seconds: i64,

    /// Age (seconds) after which a still-`pending` job is reaped as `failed(dispatch)`.
    #[arg(long, env = "DISPATCH_REAPER_AGE_SECONDS", default_value_t = 60)]
    pub dispatch_reaper_age_seconds: i64,

    /// Number of in-flight ingest workflows above which new ingests are
    /// rejected with `503 service_unavailable` so contributors back off
    /// instead of piling more work onto a saturated pipeline.
    #[arg(long, env = "WORKFLOW_QUEUE_DEPTH_THRESHOLD", default_value_t = 256)]
    pub workflow_queue_depth_threshold: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Config::parse()
    }
}
