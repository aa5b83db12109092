//! In-memory fake satisfying every store trait, used by integration tests
//! (`tests/store_contract.rs`) and by `mesh-workflow`/`mesh-api` tests that
//! don't need a real libsql file. Uses a plain `Arc<Mutex<HashMap<...>>>`
//! shared-state idiom; no lock is ever held across an await because every
//! operation here is pure in-memory work.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_models::{Job, JobFilter, JobOrderBy, JobState, Vuln};

use crate::errors::StoreError;
use crate::traits::{GraphStore, JobStore, VectorIndex, WorkflowStepStore};
use crate::types::{
    EnrichedHost, GeoChain, GraphQuery, HostSummary, HostView, Page, PortView, Protocol, ServiceView, SimilarResult,
    UpsertBatch, UpsertSummary,
};

#[derive(Debug, Clone)]
struct HostRecord {
    ip: String,
    asn: Option<u32>,
    asn_org: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    cloud_region: Option<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PortRecord {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ServiceRecord {
    name: String,
    product: Option<String>,
    version: Option<String>,
    cpe: BTreeSet<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct EdgeStamp {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct VulnDocRecord {
    cpe: BTreeSet<String>,
    embedding: Option<Vec<f32>>,
}

#[derive(Default)]
struct Inner {
    hosts: HashMap<String, HostRecord>,
    ports: HashMap<(String, u16, Protocol), PortRecord>,
    services: HashMap<String, ServiceRecord>,
    runs_edges: HashMap<(String, u16, Protocol, String), EdgeStamp>,
    observations: HashSet<(String, String, u16, String)>,
    affected_by: HashMap<String, BTreeSet<String>>,
    vulns: HashMap<String, Vuln>,
    vuln_docs: HashMap<String, VulnDocRecord>,
    jobs: HashMap<String, Job>,
    workflow_steps: HashMap<(String, String), serde_json::Value>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Test/seed hook: registers a vuln + doc pair so `upsert` can resolve
    /// `AFFECTED_BY` edges and `similar()` has something to search. Vulns
    /// are owned by an out-of-scope ingester in production;
    /// this mirrors that external write path for tests.
    pub fn seed_vuln(&self, vuln: Vuln, cpe: BTreeSet<String>, embedding: Option<Vec<f32>>) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.vuln_docs.insert(
            vuln.cve_id.clone(),
            VulnDocRecord {
                cpe,
                embedding,
            },
        );
        inner.vulns.insert(vuln.cve_id.clone(), vuln);
        recompute_affected_by(&mut inner);
    }
}

fn recompute_affected_by(inner: &mut Inner) {
    inner.affected_by.clear();
    for (fingerprint, service) in &inner.services {
        let mut matched = BTreeSet::new();
        for (cve_id, doc) in &inner.vuln_docs {
            if service.cpe.intersection(&doc.cpe).next().is_some() {
                matched.insert(cve_id.clone());
            }
        }
        if !matched.is_empty() {
            inner.affected_by.insert(fingerprint.clone(), matched);
        }
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn upsert(&self, batch: UpsertBatch) -> Result<UpsertSummary, StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let mut hosts_written = 0u32;
        let mut ports_written = 0u32;

        for host in &batch.hosts {
            match inner.hosts.get_mut(&host.ip) {
                Some(existing) => {
                    existing.last_seen = existing.last_seen.max(batch.observed_at);
                    if host.asn.is_some() {
                        existing.asn = host.asn;
                    }
                    if host.asn_org.is_some() {
                        existing.asn_org = host.asn_org.clone();
                    }
                    if host.city.is_some() {
                        existing.city = host.city.clone();
                    }
                    if host.region.is_some() {
                        existing.region = host.region.clone();
                    }
                    if host.country.is_some() {
                        existing.country = host.country.clone();
                    }
                    if host.cloud_region.is_some() {
                        existing.cloud_region = host.cloud_region.clone();
                    }
                }
                None => {
                    inner.hosts.insert(
                        host.ip.clone(),
                        HostRecord {
                            ip: host.ip.clone(),
                            asn: host.asn,
                            asn_org: host.asn_org.clone(),
                            city: host.city.clone(),
                            region: host.region.clone(),
                            country: host.country.clone(),
                            cloud_region: host.cloud_region.clone(),
                            first_seen: batch.observed_at,
                            last_seen: batch.observed_at,
                        },
                    );
                    hosts_written += 1;
                }
            }

            for port in &host.ports {
                let port_key = (host.ip.clone(), port.number, port.protocol.clone());
                match inner.ports.get_mut(&port_key) {
                    Some(existing) => existing.last_seen = existing.last_seen.max(batch.observed_at),
                    None => {
                        inner.ports.insert(
                            port_key.clone(),
                            PortRecord {
                                first_seen: batch.observed_at,
                                last_seen: batch.observed_at,
                            },
                        );
                        ports_written += 1;
                    }
                }

                for service in &port.services {
                    let fingerprint = mesh_models::Service::compute_fingerprint(
                        &service.name,
                        service.product.as_deref(),
                        service.version.as_deref(),
                    );
                    match inner.services.get_mut(&fingerprint) {
                        Some(existing) => {
                            existing.last_seen = existing.last_seen.max(batch.observed_at);
                            existing.cpe.extend(service.cpe.iter().cloned());
                        }
                        None => {
                            inner.services.insert(
                                fingerprint.clone(),
                                ServiceRecord {
                                    name: service.name.clone(),
                                    product: service.product.clone(),
                                    version: service.version.clone(),
                                    cpe: service.cpe.clone(),
                                    first_seen: batch.observed_at,
                                    last_seen: batch.observed_at,
                                },
                            );
                        }
                    }

                    let edge_key = (host.ip.clone(), port.number, port.protocol.clone(), fingerprint.clone());
                    inner
                        .runs_edges
                        .entry(edge_key)
                        .and_modify(|e| e.last_seen = e.last_seen.max(batch.observed_at))
                        .or_insert(EdgeStamp {
                            first_seen: batch.observed_at,
                            last_seen: batch.observed_at,
                        });

                    let obs_key = (batch.scan_id.clone(), host.ip.clone(), port.number, fingerprint.clone());
                    inner.observations.insert(obs_key);
                }
            }
        }

        recompute_affected_by(&mut inner);
        Ok(UpsertSummary {
            hosts_written,
            ports_written,
        })
    }

    async fn host_view(&self, ip: &str, depth: u8) -> Result<Option<HostView>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let Some(host) = inner.hosts.get(ip) else {
            return Ok(None);
        };

        let mut view = HostView {
            ip: host.ip.clone(),
            asn: host.asn,
            asn_org: host.asn_org.clone(),
            city: host.city.clone(),
            region: host.region.clone(),
            country: host.country.clone(),
            cloud_region: host.cloud_region.clone(),
            first_seen: host.first_seen,
            last_seen: host.last_seen,
            ports: None,
            geo_chain: None,
        };

        if depth >= 1 {
            let mut ports: Vec<PortView> = inner
                .ports
                .keys()
                .filter(|(h, _, _)| h.as_str() == ip)
                .map(|(_, number, protocol)| {
                    let services = if depth >= 2 {
                        let mut svcs: Vec<ServiceView> = inner
                            .runs_edges
                            .keys()
                            .filter(|(h, n, p, _)| h.as_str() == ip && n == number && p == protocol)
                            .filter_map(|(_, _, _, fingerprint)| {
                                inner.services.get(fingerprint).map(|s| {
                                    let vulns = if depth >= 3 {
                                        let cves = inner.affected_by.get(fingerprint).cloned().unwrap_or_default();
                                        Some(
                                            cves.into_iter()
                                                .filter_map(|cve| inner.vulns.get(&cve).cloned())
                                                .collect(),
                                        )
                                    } else {
                                        None
                                    };
                                    ServiceView {
                                        fingerprint: fingerprint.clone(),
                                        name: s.name.clone(),
                                        product: s.product.clone(),
                                        version: s.version.clone(),
                                        cpe: s.cpe.clone(),
                                        vulns,
                                    }
                                })
                            })
                            .collect();
                        svcs.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
                        Some(svcs)
                    } else {
                        None
                    };
                    PortView {
                        number: *number,
                        protocol: protocol.clone(),
                        services,
                    }
                })
                .collect();
            ports.sort_by_key(|p| (p.number, p.protocol.clone()));
            view.ports = Some(ports);
        }

        if depth >= 4 {
            view.geo_chain = Some(GeoChain {
                city: host.city.clone(),
                region: host.region.clone(),
                country: host.country.clone(),
                asn: host.asn,
                asn_org: host.asn_org.clone(),
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
        let inner = self.inner.lock().expect("memory store poisoned");

        let mut matched: Vec<&HostRecord> = match &query {
            GraphQuery::ByAsn { asn } => inner.hosts.values().filter(|h| h.asn == Some(*asn)).collect(),
            GraphQuery::ByLocation { city, region, country } => inner
                .hosts
                .values()
                .filter(|h| {
                    if let Some(city) = city {
                        h.city.as_deref() == Some(city.as_str())
                    } else if let Some(region) = region {
                        h.region.as_deref() == Some(region.as_str())
                    } else if let Some(country) = country {
                        h.country.as_deref() == Some(country.as_str())
                    } else {
                        false
                    }
                })
                .collect(),
            GraphQuery::ByVuln { cve } => {
                let affected_fingerprints: BTreeSet<&String> = inner
                    .affected_by
                    .iter()
                    .filter(|(_, cves)| cves.contains(cve))
                    .map(|(fingerprint, _)| fingerprint)
                    .collect();
                let host_ips: BTreeSet<&String> = inner
                    .runs_edges
                    .keys()
                    .filter(|(_, _, _, fingerprint)| affected_fingerprints.contains(fingerprint))
                    .map(|(host_ip, _, _, _)| host_ip)
                    .collect();
                host_ips.into_iter().filter_map(|ip| inner.hosts.get(ip)).collect()
            }
            GraphQuery::ByService { product, service } => {
                let matching_fingerprints: BTreeSet<&String> = inner
                    .services
                    .iter()
                    .filter(|(_, s)| {
                        let product_ok = product.as_deref().map(|p| s.product.as_deref() == Some(p)).unwrap_or(true);
                        let service_ok = service.as_deref().map(|svc| s.name == svc).unwrap_or(true);
                        product_ok && service_ok
                    })
                    .map(|(fingerprint, _)| fingerprint)
                    .collect();
                let host_ips: BTreeSet<&String> = inner
                    .runs_edges
                    .keys()
                    .filter(|(_, _, _, fingerprint)| matching_fingerprints.contains(fingerprint))
                    .map(|(host_ip, _, _, _)| host_ip)
                    .collect();
                host_ips.into_iter().filter_map(|ip| inner.hosts.get(ip)).collect()
            }
        };

        matched.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.ip.cmp(&b.ip)));
        let total = matched.len() as u64;

        let page: Vec<HostSummary> = matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|h| HostSummary {
                ip: h.ip.clone(),
                asn: h.asn,
                city: h.city.clone(),
                region: h.region.clone(),
                country: h.country.clone(),
                last_seen: h.last_seen,
            })
            .collect();

        let has_more = (offset as u64) + (page.len() as u64) < total;

        Ok(Page {
            items: page,
            total,
            has_more,
        })
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn similar(&self, embedding: &[f32], k: usize, min_score: f32) -> Result<Vec<SimilarResult>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");

        let with_embeddings: Vec<&String> = inner
            .vuln_docs
            .iter()
            .filter(|(_, doc)| doc.embedding.is_some())
            .map(|(cve, _)| cve)
            .collect();

        if with_embeddings.is_empty() {
            return Err(StoreError::EmptyIndex);
        }

        let mut scored: Vec<(String, f32)> = with_embeddings
            .into_iter()
            .map(|cve| {
                let doc = &inner.vuln_docs[cve];
                let score = cosine_similarity(embedding, doc.embedding.as_ref().unwrap());
                (cve.clone(), score)
            })
            .filter(|(_, score)| *score >= min_score)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(cve_id, score)| {
                let vuln = inner.vulns.get(&cve_id);
                SimilarResult {
                    cve_id: cve_id.clone(),
                    title: cve_id.clone(),
                    score,
                    severity: vuln.map(|v| v.severity),
                    kev_flag: vuln.map(|v| v.kev_flag),
                }
            })
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    // Cosine distance is in [-1, 1]; rescale to [0, 1] so 1 means identical.
    ((dot / (norm_a * norm_b)) + 1.0) / 2.0
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, scanner_key: Option<String>) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now();
        let job = Job::new(id.clone(), scanner_key, now);
        inner.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.jobs.get(id).cloned())
    }

    async fn advance(
        &self,
        id: &str,
        target: JobState,
        error: Option<String>,
        host_count: Option<u32>,
        port_count: Option<u32>,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let job = inner.jobs.get_mut(id).ok_or(StoreError::NotFound)?;

        if !job.state.can_advance_to(target) {
            return Err(StoreError::InvalidTransition);
        }

        let now = Utc::now();
        job.state = target;
        job.updated_at = now;
        job.error = error;
        if let Some(h) = host_count {
            job.host_count = h;
        }
        if let Some(p) = port_count {
            job.port_count = p;
        }
        if target.is_terminal() {
            job.completed_at = Some(now);
        }

        Ok(job.clone())
    }

    async fn list(
        &self,
        filter: JobFilter,
        order_by: JobOrderBy,
        desc: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Page<Job>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");

        let mut matched: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| filter.scanner_key.as_ref().map(|k| j.scanner_key.as_deref() == Some(k.as_str())).unwrap_or(true))
            .filter(|j| filter.state.map(|s| j.state == s).unwrap_or(true))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let ord = match order_by {
                JobOrderBy::CreatedAt => a.created_at.cmp(&b.created_at),
                JobOrderBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            if desc {
                ord.reverse()
            } else {
                ord
            }
        });

        let total = matched.len() as u64;
        let page: Vec<Job> = matched.into_iter().skip(offset as usize).take(limit as usize).collect();
        let has_more = (offset as u64) + (page.len() as u64) < total;

        Ok(Page {
            items: page,
            total,
            has_more,
        })
    }
}

#[async_trait]
impl WorkflowStepStore for MemoryStore {
    async fn get_step_result(
        &self,
        workflow_key: &str,
        step_name: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.workflow_steps.get(&(workflow_key.to_string(), step_name.to_string())).cloned())
    }

    async fn put_step_result(
        &self,
        workflow_key: &str,
        step_name: &str,
        result: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner
            .workflow_steps
            .insert((workflow_key.to_string(), step_name.to_string()), result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mesh_models::Severity as Sev;

    fn host(ip: &str, port: u16) -> EnrichedHost {
        crate::types::EnrichedHost {
            ip: ip.to_string(),
            asn: Some(64500),
            asn_org: None,
            city: Some("Springfield".into()),
            region: None,
            country: None,
            cloud_region: None,
            ports: vec![crate::types::EnrichedPort {
                number: port,
                protocol: Protocol::Tcp,
                services: vec![],
            }],
        }
    }

    fn batch(scan_id: &str, ip: &str, port: u16, observed_at: DateTime<Utc>) -> UpsertBatch {
        UpsertBatch {
            scan_id: scan_id.to_string(),
            contributor_id: "k1".to_string(),
            observed_at,
            hosts: vec![host(ip, port)],
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_under_exact_replay() {
        let store = MemoryStore::new();
        let observed_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let b = batch("scan-1", "192.0.2.1", 22, observed_at);

        let first = store.upsert(b.clone()).await.unwrap();
        assert_eq!(first.hosts_written, 1);
        assert_eq!(first.ports_written, 1);

        let second = store.upsert(b).await.unwrap();
        assert_eq!(second.hosts_written, 0);
        assert_eq!(second.ports_written, 0);

        let view = store.host_view("192.0.2.1", 1).await.unwrap().unwrap();
        assert_eq!(view.ports.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_seen_is_monotonic_max() {
        let store = MemoryStore::new();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        store.upsert(batch("scan-1", "192.0.2.1", 22, t2)).await.unwrap();
        store.upsert(batch("scan-2", "192.0.2.1", 22, t1)).await.unwrap();

        let view = store.host_view("192.0.2.1", 0).await.unwrap().unwrap();
        assert_eq!(view.first_seen, t2);
        assert_eq!(view.last_seen, t2);
    }

    #[tokio::test]
    async fn depth_views_are_nested_subsets() {
        let store = MemoryStore::new();
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut h = host("192.0.2.2", 80);
        h.ports.push(crate::types::EnrichedPort {
            number: 443,
            protocol: Protocol::Tcp,
            services: vec![],
        });
        h.ports[0].services.push(crate::types::EnrichedService {
            name: "nginx".into(),
            product: Some("nginx".into()),
            version: Some("1.25".into()),
            cpe: BTreeSet::new(),
        });
        store
            .upsert(UpsertBatch {
                scan_id: "scan-1".into(),
                contributor_id: "k1".into(),
                observed_at: t,
                hosts: vec![h],
            })
            .await
            .unwrap();

        let depth0 = store.host_view("192.0.2.2", 0).await.unwrap().unwrap();
        assert!(depth0.ports.is_none());

        let depth1 = store.host_view("192.0.2.2", 1).await.unwrap().unwrap();
        assert_eq!(depth1.ports.as_ref().unwrap().len(), 2);
        assert!(depth1.ports.as_ref().unwrap()[0].services.is_none());

        let depth2 = store.host_view("192.0.2.2", 2).await.unwrap().unwrap();
        let port80 = depth2.ports.as_ref().unwrap().iter().find(|p| p.number == 80).unwrap();
        assert_eq!(port80.services.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn job_state_machine_rejects_invalid_transition() {
        let store = MemoryStore::new();
        let job = store.create(Some("scanner-1".into())).await.unwrap();
        store.advance(&job.id, JobState::Processing, None, None, None).await.unwrap();
        store.advance(&job.id, JobState::Completed, None, Some(1), Some(1)).await.unwrap();

        let result = store.advance(&job.id, JobState::Processing, None, None, None).await;
        assert!(matches!(result, Err(StoreError::InvalidTransition)));

        let fetched = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, JobState::Completed);
    }

    #[tokio::test]
    async fn similarity_search_sorts_descending_and_respects_min_score() {
        let store = MemoryStore::new();
        store.seed_vuln(
            Vuln {
                cve_id: "CVE-2024-0001".into(),
                cvss: 9.8,
                severity: Sev::Critical,
                kev_flag: true,
            },
            BTreeSet::new(),
            Some(vec![1.0, 0.0, 0.0]),
        );
        store.seed_vuln(
            Vuln {
                cve_id: "CVE-2024-0002".into(),
                cvss: 5.0,
                severity: Sev::Medium,
                kev_flag: false,
            },
            BTreeSet::new(),
            Some(vec![0.0, 1.0, 0.0]),
        );

        let results = store.similar(&[1.0, 0.0, 0.0], 10, 0.0).await.unwrap();
        assert_eq!(results[0].cve_id, "CVE-2024-0001");
        assert!(results[0].score >= results[1].score);
        for r in &results {
            assert!((0.0..=1.0).contains(&r.score));
        }
    }

    #[tokio::test]
    async fn empty_index_is_distinct_from_zero_matches() {
        let store = MemoryStore::new();
        let err = store.similar(&[1.0, 0.0, 0.0], 10, 0.0).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyIndex));
    }
}
