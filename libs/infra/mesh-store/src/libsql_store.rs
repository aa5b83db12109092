//! Production `GraphStore` / `VectorIndex` / `JobStore` / `WorkflowStepStore`
//! implementation backed by libsql: one connection per operation pulled
//! from the pooled `StoreClient`, `libsql::params!` for binding,
//! `row.get::<T>(idx)?` for extraction.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Connection};
use mesh_models::{Job, JobFilter, JobOrderBy, JobState, Vuln};

use crate::client::StoreClient;
use crate::errors::StoreError;
use crate::traits::{GraphStore, JobStore, VectorIndex, WorkflowStepStore};
use crate::types::{
    cpe_from_json, cpe_to_json, severity_from_str, GeoChain, GraphQuery, HostSummary, HostView, Page, PortView,
    Protocol, ServiceView, SimilarResult, UpsertBatch, UpsertSummary,
};

pub struct LibsqlStore {
    client: StoreClient,
}

impl LibsqlStore {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    fn conn(&self) -> Result<Connection, StoreError> {
        self.client.connection()
    }
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn from_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl GraphStore for LibsqlStore {
    async fn upsert(&self, batch: UpsertBatch) -> Result<UpsertSummary, StoreError> {
        let conn = self.conn()?;
        let tx = conn.transaction().await?;

        let mut hosts_written = 0u32;
        let mut ports_written = 0u32;
        let observed_at = to_rfc3339(batch.observed_at);

        for host in &batch.hosts {
            let exists = {
                let mut rows = tx.query("SELECT 1 FROM hosts WHERE ip = ?1", params![host.ip.clone()]).await?;
                rows.next().await?.is_some()
            };

            if exists {
                tx.execute(
                    r#"UPDATE hosts SET
                        asn = COALESCE(?2, asn),
                        asn_org = COALESCE(?3, asn_org),
                        city = COALESCE(?4, city),
                        region = COALESCE(?5, region),
                        country = COALESCE(?6, country),
                        cloud_region = COALESCE(?7, cloud_region),
                        last_seen = MAX(last_seen, ?8)
                    WHERE ip = ?1"#,
                    params![
                        host.ip.clone(),
                        host.asn.map(|a| a as i64),
                        host.asn_org.clone(),
                        host.city.clone(),
                        host.region.clone(),
                        host.country.clone(),
                        host.cloud_region.clone(),
                        observed_at.clone()
                    ],
                )
                .await?;
            } else {
                tx.execute(
                    r#"INSERT INTO hosts (ip, asn, asn_org, city, region, country, cloud_region, first_seen, last_seen)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)"#,
                    params![
                        host.ip.clone(),
                        host.asn.map(|a| a as i64),
                        host.asn_org.clone(),
                        host.city.clone(),
                        host.region.clone(),
                        host.country.clone(),
                        host.cloud_region.clone(),
                        observed_at.clone()
                    ],
                )
                .await?;
                hosts_written += 1;
            }

            for port in &host.ports {
                let protocol_str = port.protocol.to_string();
                let exists = {
                    let mut rows = tx
                        .query(
                            "SELECT 1 FROM ports WHERE host_ip = ?1 AND number = ?2 AND protocol = ?3",
                            params![host.ip.clone(), port.number as i64, protocol_str.clone()],
                        )
                        .await?;
                    rows.next().await?.is_some()
                };

                if exists {
                    tx.execute(
                        r#"UPDATE ports SET last_seen = MAX(last_seen, ?4)
                           WHERE host_ip = ?1 AND number = ?2 AND protocol = ?3"#,
                        params![host.ip.clone(), port.number as i64, protocol_str.clone(), observed_at.clone()],
                    )
                    .await?;
                } else {
                    tx.execute(
                        r#"INSERT INTO ports (host_ip, number, protocol, first_seen, last_seen)
                           VALUES (?1, ?2, ?3, ?4, ?4)"#,
                        params![host.ip.clone(), port.number as i64, protocol_str.clone(), observed_at.clone()],
                    )
                    .await?;
                    ports_written += 1;
                }

                for service in &port.services {
                    let fingerprint = mesh_models::Service::compute_fingerprint(
                        &service.name,
                        service.product.as_deref(),
                        service.version.as_deref(),
                    );

                    let existing_cpe: Option<String> = {
                        let mut rows = tx
                            .query("SELECT cpe FROM services WHERE fingerprint = ?1", params![fingerprint.clone()])
                            .await?;
                        match rows.next().await? {
                            Some(row) => Some(row.get::<String>(0)?),
                            None => None,
                        }
                    };

                    let merged_cpe = match &existing_cpe {
                        Some(existing_json) => {
                            let mut set = cpe_from_json(existing_json);
                            set.extend(service.cpe.iter().cloned());
                            set
                        }
                        None => service.cpe.clone(),
                    };
                    let merged_cpe_json = cpe_to_json(&merged_cpe);

                    if existing_cpe.is_some() {
                        tx.execute(
                            r#"UPDATE services SET cpe = ?2, last_seen = MAX(last_seen, ?3) WHERE fingerprint = ?1"#,
                            params![fingerprint.clone(), merged_cpe_json, observed_at.clone()],
                        )
                        .await?;
                    } else {
                        tx.execute(
                            r#"INSERT INTO services (fingerprint, name, product, version, cpe, first_seen, last_seen)
                               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)"#,
                            params![
                                fingerprint.clone(),
                                service.name.clone(),
                                service.product.clone(),
                                service.version.clone(),
                                merged_cpe_json,
                                observed_at.clone()
                            ],
                        )
                        .await?;
                    }

                    tx.execute(
                        r#"INSERT INTO runs_edges (host_ip, port_number, protocol, service_fingerprint, first_seen, last_seen)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                           ON CONFLICT(host_ip, port_number, protocol, service_fingerprint)
                           DO UPDATE SET last_seen = MAX(runs_edges.last_seen, excluded.last_seen)"#,
                        params![
                            host.ip.clone(),
                            port.number as i64,
                            protocol_str.clone(),
                            fingerprint.clone(),
                            observed_at.clone()
                        ],
                    )
                    .await?;

                    // Observation edges are appended, never updated; the
                    // primary key on (scan_id, host_ip, port_number,
                    // service_fingerprint) makes replay a no-op.
                    tx.execute(
                        r#"INSERT OR IGNORE INTO observations
                           (scan_id, contributor_id, host_ip, port_number, service_fingerprint, observed_at, trust)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1.0)"#,
                        params![
                            batch.scan_id.clone(),
                            batch.contributor_id.clone(),
                            host.ip.clone(),
                            port.number as i64,
                            fingerprint.clone(),
                            observed_at.clone()
                        ],
                    )
                    .await?;

                    recompute_affected_by_for_service(&tx, &fingerprint, &merged_cpe).await?;
                }
            }
        }

        tx.commit().await?;

        Ok(UpsertSummary {
            hosts_written,
            ports_written,
        })
    }

    async fn host_view(&self, ip: &str, depth: u8) -> Result<Option<HostView>, StoreError> {
        let conn = self.conn()?;

        let mut rows = conn
            .query(
                "SELECT ip, asn, asn_org, city, region, country, cloud_region, first_seen, last_seen FROM hosts WHERE ip = ?1",
                params![ip.to_string()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let mut view = HostView {
            ip: row.get::<String>(0)?,
            asn: row.get::<Option<i64>>(1)?.map(|v| v as u32),
            asn_org: row.get::<Option<String>>(2)?,
            city: row.get::<Option<String>>(3)?,
            region: row.get::<Option<String>>(4)?,
            country: row.get::<Option<String>>(5)?,
            cloud_region: row.get::<Option<String>>(6)?,
            first_seen: from_rfc3339(&row.get::<String>(7)?),
            last_seen: from_rfc3339(&row.get::<String>(8)?),
            ports: None,
            geo_chain: None,
        };

        if depth >= 1 {
            let mut port_rows = conn
                .query(
                    "SELECT number, protocol FROM ports WHERE host_ip = ?1 ORDER BY number, protocol",
                    params![ip.to_string()],
                )
                .await?;

            let mut ports = Vec::new();
            while let Some(prow) = port_rows.next().await? {
                let number = prow.get::<i64>(0)? as u16;
                let protocol: Protocol = prow.get::<String>(1)?.parse().map_err(StoreError::Query)?;

                let services = if depth >= 2 {
                    Some(load_services_for_port(&conn, ip, number, &protocol, depth >= 3).await?)
                } else {
                    None
                };

                ports.push(PortView {
                    number,
                    protocol,
                    services,
                });
            }
            view.ports = Some(ports);
        }

        if depth >= 4 {
            view.geo_chain = Some(GeoChain {
                city: view.city.clone(),
                region: view.region.clone(),
                country: view.country.clone(),
                asn: view.asn,
                asn_org: view.asn_org.clone(),
            });
        }

        Ok(Some(view))
    }

    async fn graph_query(
        &self,
        query: GraphQuery,
        limit: u32,
        offset: u32,
    ) -> Result<Page<HostSummary>, StoreError> {
        let conn = self.conn()?;

        let (count_sql, select_sql, bind): (String, String, Vec<libsql::Value>) = match &query {
            GraphQuery::ByAsn { asn } => (
                "SELECT COUNT(*) FROM hosts WHERE asn = ?1".to_string(),
                "SELECT ip, asn, city, region, country, last_seen FROM hosts WHERE asn = ?1 ORDER BY last_seen DESC LIMIT ?2 OFFSET ?3".to_string(),
                vec![libsql::Value::Integer(*asn as i64)],
            ),
            GraphQuery::ByLocation { city, region, country } => {
                let (column, value) = if let Some(c) = city {
                    ("city", c.clone())
                } else if let Some(r) = region {
                    ("region", r.clone())
                } else {
                    ("country", country.clone().unwrap_or_default())
                };
                (
                    format!("SELECT COUNT(*) FROM hosts WHERE {column} = ?1"),
                    format!(
                        "SELECT ip, asn, city, region, country, last_seen FROM hosts WHERE {column} = ?1 ORDER BY last_seen DESC LIMIT ?2 OFFSET ?3"
                    ),
                    vec![libsql::Value::Text(value)],
                )
            }
            GraphQuery::ByVuln { cve } => (
                r#"SELECT COUNT(DISTINCT h.ip) FROM hosts h
                   JOIN runs_edges r ON r.host_ip = h.ip
                   JOIN affected_by_edges a ON a.service_fingerprint = r.service_fingerprint
                   WHERE a.cve_id = ?1"#
                    .to_string(),
                r#"SELECT DISTINCT h.ip, h.asn, h.city, h.region, h.country, h.last_seen FROM hosts h
                   JOIN runs_edges r ON r.host_ip = h.ip
                   JOIN affected_by_edges a ON a.service_fingerprint = r.service_fingerprint
                   WHERE a.cve_id = ?1
                   ORDER BY h.last_seen DESC LIMIT ?2 OFFSET ?3"#
                    .to_string(),
                vec![libsql::Value::Text(cve.clone())],
            ),
            GraphQuery::ByService { product, service } => {
                let (column, value) = if let Some(p) = product {
                    ("product", p.clone())
                } else {
                    ("name", service.clone().unwrap_or_default())
                };
                (
                    format!(
                        r#"SELECT COUNT(DISTINCT h.ip) FROM hosts h
                           JOIN runs_edges r ON r.host_ip = h.ip
                           JOIN services s ON s.fingerprint = r.service_fingerprint
                           WHERE s.{column} = ?1"#
                    ),
                    format!(
                        r#"SELECT DISTINCT h.ip, h.asn, h.city, h.region, h.country, h.last_seen FROM hosts h
                           JOIN runs_edges r ON r.host_ip = h.ip
                           JOIN services s ON s.fingerprint = r.service_fingerprint
                           WHERE s.{column} = ?1
                           ORDER BY h.last_seen DESC LIMIT ?2 OFFSET ?3"#
                    ),
                    vec![libsql::Value::Text(value)],
                )
            }
        };

        let total: u64 = {
            let mut rows = conn.query(&count_sql, bind.clone()).await?;
            match rows.next().await? {
                Some(row) => row.get::<i64>(0)? as u64,
                None => 0,
            }
        };

        let mut select_bind = bind;
        select_bind.push(libsql::Value::Integer((limit + 1) as i64));
        select_bind.push(libsql::Value::Integer(offset as i64));

        let mut rows = conn.query(&select_sql, select_bind).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(HostSummary {
                ip: row.get::<String>(0)?,
                asn: row.get::<Option<i64>>(1)?.map(|v| v as u32),
                city: row.get::<Option<String>>(2)?,
                region: row.get::<Option<String>>(3)?,
                country: row.get::<Option<String>>(4)?,
                last_seen: from_rfc3339(&row.get::<String>(5)?),
            });
        }

        let has_more = items.len() as u32 > limit;
        items.truncate(limit as usize);

        Ok(Page { items, total, has_more })
    }
}

async fn load_services_for_port(
    conn: &Connection,
    host_ip: &str,
    port_number: u16,
    protocol: &Protocol,
    include_vulns: bool,
) -> Result<Vec<ServiceView>, StoreError> {
    let mut rows = conn
        .query(
            r#"SELECT s.fingerprint, s.name, s.product, s.version, s.cpe
               FROM services s
               JOIN runs_edges r ON r.service_fingerprint = s.fingerprint
               WHERE r.host_ip = ?1 AND r.port_number = ?2 AND r.protocol = ?3
               ORDER BY s.fingerprint"#,
            params![host_ip.to_string(), port_number as i64, protocol.to_string()],
        )
        .await?;

    let mut services = Vec::new();
    while let Some(row) = rows.next().await? {
        let fingerprint = row.get::<String>(0)?;
        let cpe = cpe_from_json(&row.get::<String>(4)?);

        let vulns = if include_vulns {
            Some(load_vulns_for_service(conn, &fingerprint).await?)
        } else {
            None
        };

        services.push(ServiceView {
            fingerprint,
            name: row.get::<String>(1)?,
            product: row.get::<Option<String>>(2)?,
            version: row.get::<Option<String>>(3)?,
            cpe,
            vulns,
        });
    }

    Ok(services)
}

async fn load_vulns_for_service(conn: &Connection, fingerprint: &str) -> Result<Vec<Vuln>, StoreError> {
    let mut rows = conn
        .query(
            r#"SELECT v.cve_id, v.cvss, v.severity, v.kev_flag
               FROM vulns v
               JOIN affected_by_edges a ON a.cve_id = v.cve_id
               WHERE a.service_fingerprint = ?1"#,
            params![fingerprint.to_string()],
        )
        .await?;

    let mut vulns = Vec::new();
    while let Some(row) = rows.next().await? {
        vulns.push(Vuln {
            cve_id: row.get::<String>(0)?,
            cvss: row.get::<f64>(1)? as f32,
            severity: severity_from_str(&row.get::<String>(2)?),
            kev_flag: row.get::<i64>(3)? != 0,
        });
    }
    Ok(vulns)
}

/// Recomputes `AFFECTED_BY` for one service against every known vuln doc:
/// the edge exists iff at least one CPE is shared. Vulns are
/// owned by an out-of-scope ingester, so this only ever reads `vuln_docs`.
async fn recompute_affected_by_for_service(
    tx: &libsql::Transaction,
    fingerprint: &str,
    service_cpe: &BTreeSet<String>,
) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM affected_by_edges WHERE service_fingerprint = ?1",
        params![fingerprint.to_string()],
    )
    .await?;

    if service_cpe.is_empty() {
        return Ok(());
    }

    let mut rows = tx.query("SELECT cve_id, cpe FROM vuln_docs", ()).await?;
    while let Some(row) = rows.next().await? {
        let cve_id = row.get::<String>(0)?;
        let doc_cpe = cpe_from_json(&row.get::<String>(1)?);
        if service_cpe.intersection(&doc_cpe).next().is_some() {
            tx.execute(
                "INSERT OR IGNORE INTO affected_by_edges (service_fingerprint, cve_id) VALUES (?1, ?2)",
                params![fingerprint.to_string(), cve_id],
            )
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for LibsqlStore {
    async fn similar(&self, embedding: &[f32], k: usize, min_score: f32) -> Result<Vec<SimilarResult>, StoreError> {
        let conn = self.conn()?;

        let indexed: i64 = {
            let mut rows = conn
                .query("SELECT COUNT(*) FROM vuln_docs WHERE embedding IS NOT NULL", ())
                .await?;
            match rows.next().await? {
                Some(row) => row.get::<i64>(0)?,
                None => 0,
            }
        };
        if indexed == 0 {
            return Err(StoreError::EmptyIndex);
        }

        let embedding_json = serde_json::to_string(embedding).map_err(|e| StoreError::Query(e.to_string()))?;

        let mut rows = conn
            .query(
                r#"SELECT v.cve_id, v.title,
                          (1.0 - vector_distance_cos(v.embedding, vector32(?1)) / 2.0) AS score,
                          vu.severity, vu.kev_flag
                   FROM vuln_docs v
                   LEFT JOIN vulns vu ON vu.cve_id = v.cve_id
                   WHERE v.embedding IS NOT NULL
                   ORDER BY score DESC
                   LIMIT ?2"#,
                params![embedding_json, k as i64],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let score = row.get::<f64>(2)? as f32;
            if score < min_score {
                continue;
            }
            results.push(SimilarResult {
                cve_id: row.get::<String>(0)?,
                title: row.get::<String>(1)?,
                score,
                severity: row.get::<Option<String>>(3)?.map(|s| severity_from_str(&s)),
                kev_flag: row.get::<Option<i64>>(4)?.map(|v| v != 0),
            });
        }

        Ok(results)
    }
}

#[async_trait]
impl JobStore for LibsqlStore {
    async fn create(&self, scanner_key: Option<String>) -> Result<Job, StoreError> {
        let conn = self.conn()?;
        let id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now();
        let now_str = to_rfc3339(now);

        conn.execute(
            r#"INSERT INTO jobs (id, scanner_key, state, created_at, updated_at, host_count, port_count, dispatch_attempts)
               VALUES (?1, ?2, 'pending', ?3, ?3, 0, 0, 0)"#,
            params![id.clone(), scanner_key.clone(), now_str],
        )
        .await?;

        Ok(Job::new(id, scanner_key, now))
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                r#"SELECT id, scanner_key, state, created_at, updated_at, completed_at, error, host_count, port_count
                   FROM jobs WHERE id = ?1"#,
                params![id.to_string()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(row_to_job(&row)?))
    }

    async fn advance(
        &self,
        id: &str,
        target: JobState,
        error: Option<String>,
        host_count: Option<u32>,
        port_count: Option<u32>,
    ) -> Result<Job, StoreError> {
        let conn = self.conn()?;
        let tx = conn.transaction().await?;

        let current = {
            let mut rows = tx
                .query(
                    r#"SELECT id, scanner_key, state, created_at, updated_at, completed_at, error, host_count, port_count
                       FROM jobs WHERE id = ?1"#,
                    params![id.to_string()],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_job(&row)?,
                None => return Err(StoreError::NotFound),
            }
        };

        if !current.state.can_advance_to(target) {
            return Err(StoreError::InvalidTransition);
        }

        let now = Utc::now();
        let now_str = to_rfc3339(now);
        let completed_at = if target.is_terminal() { Some(now_str.clone()) } else { None };
        let new_host_count = host_count.unwrap_or(current.host_count);
        let new_port_count = port_count.unwrap_or(current.port_count);

        tx.execute(
            r#"UPDATE jobs SET state = ?2, updated_at = ?3, completed_at = ?4, error = ?5, host_count = ?6, port_count = ?7
               WHERE id = ?1"#,
            params![
                id.to_string(),
                target.to_string(),
                now_str,
                completed_at,
                error.clone(),
                new_host_count as i64,
                new_port_count as i64
            ],
        )
        .await?;

        tx.commit().await?;

        Ok(Job {
            id: current.id,
            scanner_key: current.scanner_key,
            state: target,
            created_at: current.created_at,
            updated_at: now,
            completed_at: if target.is_terminal() { Some(now) } else { None },
            error,
            host_count: new_host_count,
            port_count: new_port_count,
        })
    }

    async fn list(
        &self,
        filter: JobFilter,
        order_by: JobOrderBy,
        desc: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Page<Job>, StoreError> {
        let conn = self.conn()?;

        let order_column = match order_by {
            JobOrderBy::CreatedAt => "created_at",
            JobOrderBy::UpdatedAt => "updated_at",
        };
        let direction = if desc { "DESC" } else { "ASC" };

        let mut clauses = Vec::new();
        let mut bind: Vec<libsql::Value> = Vec::new();
        if let Some(scanner_key) = &filter.scanner_key {
            bind.push(libsql::Value::Text(scanner_key.clone()));
            clauses.push(format!("scanner_key = ?{}", bind.len()));
        }
        if let Some(state) = filter.state {
            bind.push(libsql::Value::Text(state.to_string()));
            clauses.push(format!("state = ?{}", bind.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {where_sql}");
        let total: u64 = {
            let mut rows = conn.query(&count_sql, bind.clone()).await?;
            match rows.next().await? {
                Some(row) => row.get::<i64>(0)? as u64,
                None => 0,
            }
        };

        let mut select_bind = bind;
        let limit_idx = select_bind.len() + 1;
        let offset_idx = select_bind.len() + 2;
        select_bind.push(libsql::Value::Integer((limit + 1) as i64));
        select_bind.push(libsql::Value::Integer(offset as i64));

        let select_sql = format!(
            r#"SELECT id, scanner_key, state, created_at, updated_at, completed_at, error, host_count, port_count
               FROM jobs {where_sql}
               ORDER BY {order_column} {direction}
               LIMIT ?{limit_idx} OFFSET ?{offset_idx}"#
        );

        let mut rows = conn.query(&select_sql, select_bind).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_job(&row)?);
        }

        let has_more = items.len() as u32 > limit;
        items.truncate(limit as usize);

        Ok(Page { items, total, has_more })
    }
}

fn row_to_job(row: &libsql::Row) -> Result<Job, StoreError> {
    let state_str = row.get::<String>(2)?;
    let state = match state_str.as_str() {
        "pending" => JobState::Pending,
        "processing" => JobState::Processing,
        "completed" => JobState::Completed,
        "failed" => JobState::Failed,
        other => return Err(StoreError::Query(format!("unknown job state: {other}"))),
    };

    Ok(Job {
        id: row.get::<String>(0)?,
        scanner_key: row.get::<Option<String>>(1)?,
        state,
        created_at: from_rfc3339(&row.get::<String>(3)?),
        updated_at: from_rfc3339(&row.get::<String>(4)?),
        completed_at: row.get::<Option<String>>(5)?.map(|s| from_rfc3339(&s)),
        error: row.get::<Option<String>>(6)?,
        host_count: row.get::<i64>(7)? as u32,
        port_count: row.get::<i64>(8)? as u32,
    })
}

#[async_trait]
impl WorkflowStepStore for LibsqlStore {
    async fn get_step_result(
        &self,
        workflow_key: &str,
        step_name: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT result_json FROM workflow_steps WHERE workflow_key = ?1 AND step_name = ?2",
                params![workflow_key.to_string(), step_name.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let json_str = row.get::<String>(0)?;
                let value = serde_json::from_str(&json_str).map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put_step_result(
        &self,
        workflow_key: &str,
        step_name: &str,
        result: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let json_str = serde_json::to_string(result).map_err(|e| StoreError::Query(e.to_string()))?;
        let now = to_rfc3339(Utc::now());

        conn.execute(
            r#"INSERT INTO workflow_steps (workflow_key, step_name, result_json, completed_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(workflow_key, step_name) DO UPDATE SET result_json = excluded.result_json, completed_at = excluded.completed_at"#,
            params![workflow_key.to_string(), step_name.to_string(), json_str, now],
        )
        .await?;

        Ok(())
    }
}
