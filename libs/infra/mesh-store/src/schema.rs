//! Logical persisted layout: one node table per entity kind,
//! one edge table per relation, one observation table, a job table, and a
//! cosine-indexed vector table for vulnerability embeddings. Every
//! statement is `CREATE TABLE IF NOT EXISTS`, so bootstrap is idempotent
//! across restarts and across the memory-anchor / disk / remote branches
//! in `client.rs`.

use tracing::{debug, info, instrument};

const TABLES: &[(&str, &str)] = &[
    (
        "hosts",
        r#"
        CREATE TABLE IF NOT EXISTS hosts (
            ip TEXT PRIMARY KEY,
            asn INTEGER,
            asn_org TEXT,
            city TEXT,
            region TEXT,
            country TEXT,
            cloud_region TEXT,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL
        );
    "#,
    ),
    (
        "ports",
        r#"
        CREATE TABLE IF NOT EXISTS ports (
            host_ip TEXT NOT NULL,
            number INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            transport TEXT,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            PRIMARY KEY (host_ip, number, protocol),
            FOREIGN KEY (host_ip) REFERENCES hosts(ip)
        );
    "#,
    ),
    (
        "services",
        r#"
        CREATE TABLE IF NOT EXISTS services (
            fingerprint TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            product TEXT,
            version TEXT,
            cpe TEXT NOT NULL DEFAULT '[]',
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL
        );
    "#,
    ),
    (
        "runs_edges",
        r#"
        CREATE TABLE IF NOT EXISTS runs_edges (
            host_ip TEXT NOT NULL,
            port_number INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            service_fingerprint TEXT NOT NULL,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            PRIMARY KEY (host_ip, port_number, protocol, service_fingerprint)
        );
    "#,
    ),
    (
        "observations",
        r#"
        CREATE TABLE IF NOT EXISTS observations (
            scan_id TEXT NOT NULL,
            contributor_id TEXT NOT NULL,
            host_ip TEXT NOT NULL,
            port_number INTEGER NOT NULL,
            service_fingerprint TEXT NOT NULL,
            observed_at TEXT NOT NULL,
            trust REAL NOT NULL DEFAULT 1.0,
            PRIMARY KEY (scan_id, host_ip, port_number, service_fingerprint)
        );
    "#,
    ),
    (
        "vulns",
        r#"
        CREATE TABLE IF NOT EXISTS vulns (
            cve_id TEXT PRIMARY KEY,
            cvss REAL NOT NULL,
            severity TEXT NOT NULL,
            kev_flag INTEGER NOT NULL DEFAULT 0
        );
    "#,
    ),
    (
        "vuln_docs",
        r#"
        CREATE TABLE IF NOT EXISTS vuln_docs (
            cve_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            cpe TEXT NOT NULL DEFAULT '[]',
            embedding F32_BLOB(1536),
            published_at TEXT NOT NULL
        );
    "#,
    ),
    (
        "affected_by_edges",
        r#"
        CREATE TABLE IF NOT EXISTS affected_by_edges (
            service_fingerprint TEXT NOT NULL,
            cve_id TEXT NOT NULL,
            PRIMARY KEY (service_fingerprint, cve_id)
        );
    "#,
    ),
    (
        "jobs",
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            scanner_key TEXT,
            state TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT,
            error TEXT,
            host_count INTEGER NOT NULL DEFAULT 0,
            port_count INTEGER NOT NULL DEFAULT 0,
            dispatch_attempts INTEGER NOT NULL DEFAULT 0
        );
    "#,
    ),
    (
        "workflow_steps",
        r#"
        CREATE TABLE IF NOT EXISTS workflow_steps (
            workflow_key TEXT NOT NULL,
            step_name TEXT NOT NULL,
            result_json TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (workflow_key, step_name)
        );
    "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_hosts_asn ON hosts(asn);",
    "CREATE INDEX IF NOT EXISTS idx_hosts_city ON hosts(city);",
    "CREATE INDEX IF NOT EXISTS idx_hosts_region ON hosts(region);",
    "CREATE INDEX IF NOT EXISTS idx_hosts_country ON hosts(country);",
    "CREATE INDEX IF NOT EXISTS idx_hosts_last_seen ON hosts(last_seen DESC);",
    "CREATE INDEX IF NOT EXISTS idx_ports_host ON ports(host_ip);",
    "CREATE INDEX IF NOT EXISTS idx_services_product ON services(product);",
    "CREATE INDEX IF NOT EXISTS idx_services_name ON services(name);",
    "CREATE INDEX IF NOT EXISTS idx_affected_by_cve ON affected_by_edges(cve_id);",
    "CREATE INDEX IF NOT EXISTS idx_jobs_scanner_key ON jobs(scanner_key);",
    "CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_vuln_docs_embedding ON vuln_docs(libsql_vector_idx(embedding));",
];

#[instrument(skip(connection))]
pub async fn apply(connection: &libsql::Connection) -> Result<(), libsql::Error> {
    for (name, ddl) in TABLES {
        debug!(table = name, "applying schema");
        connection.execute(ddl, ()).await?;
    }
    for ddl in INDEXES {
        // The vector index creation is best-effort: older libsql builds or a
        // plain-SQLite local file may not support `libsql_vector_idx`, and a
        // missing native vector index still works via a linear scan fallback.
        if let Err(err) = connection.execute(ddl, ()).await {
            debug!(%err, ddl, "index creation skipped");
        }
    }
    info!("mesh-store schema applied");
    Ok(())
}
