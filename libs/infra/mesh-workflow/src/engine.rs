use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use mesh_enrichment::{AsnAdapter, CpeAdapter, GeoIpAdapter};
use mesh_models::JobState;
use mesh_parser::{CanonicalHost, CanonicalScan};
use mesh_store::{EnrichedHost, EnrichedPort, EnrichedService, Protocol as StoreProtocol, Store, UpsertBatch, UpsertSummary};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info};

use crate::retry::{retry_with_backoff, StepError};

const DEFAULT_HOST_CONCURRENCY: usize = 8;

/// Overall wall-clock budget for one job's enrich step. Past this, the
/// cooperative-cancel flag flips so any lookup not yet past its own
/// cancellation check (`fetch`'s entry check in each adapter) bails out to
/// a missing-enrichment marker instead of starting — bounding this job's
/// total side effects on external enrichment sources regardless of how
/// many hosts it carries.
const DEFAULT_ENRICH_STEP_BUDGET: Duration = Duration::from_secs(20);

/// Drives a single ingest job from raw bytes through to a completed or failed
/// job record. Each step's result is persisted via `WorkflowStepStore` before
/// the next step starts, so a crash mid-run resumes from the last completed
/// step on retry rather than redoing enrichment calls or upsert writes.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    asn: Arc<AsnAdapter>,
    geoip: Arc<GeoIpAdapter>,
    cpe: Arc<CpeAdapter>,
    host_concurrency: usize,
    enrich_step_budget: Duration,
    in_flight: AtomicUsize,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn Store>, asn: Arc<AsnAdapter>, geoip: Arc<GeoIpAdapter>, cpe: Arc<CpeAdapter>) -> Self {
        Self {
            store,
            asn,
            geoip,
            cpe,
            host_concurrency: DEFAULT_HOST_CONCURRENCY,
            enrich_step_budget: DEFAULT_ENRICH_STEP_BUDGET,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_host_concurrency(mut self, host_concurrency: usize) -> Self {
        self.host_concurrency = host_concurrency.max(1);
        self
    }

    pub fn with_enrich_step_budget(mut self, enrich_step_budget: Duration) -> Self {
        self.enrich_step_budget = enrich_step_budget;
        self
    }

    /// Number of ingest workflows currently running (submitted but not yet
    /// terminal). The ingest handler checks this against a configured
    /// threshold before minting a job, so a contributor gets a `503` and
    /// backs off rather than piling more work onto an already-saturated
    /// pipeline.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Fires off the workflow in the background and returns immediately; the
    /// job's state is the only signal a caller polls for completion.
    pub fn submit(self: &Arc<Self>, job_id: String, contributor_id: String, raw: Vec<u8>, observed_at: DateTime<Utc>) {
        let engine = Arc::clone(self);
        engine.in_flight.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(err) = engine.run(&job_id, &contributor_id, &raw, observed_at).await {
                error!(job_id, error = %err, "ingest workflow failed");
            }
            engine.in_flight.fetch_sub(1, Ordering::Relaxed);
        });
    }

    async fn run(&self, job_id: &str, contributor_id: &str, raw: &[u8], observed_at: DateTime<Utc>) -> Result<(), StepError> {
        self.store
            .advance(job_id, JobState::Processing, None, None, None)
            .await
            .map_err(store_err)?;

        match self.run_inner(job_id, contributor_id, raw, observed_at).await {
            Ok(summary) => {
                self.store
                    .advance(
                        job_id,
                        JobState::Completed,
                        None,
                        Some(summary.hosts_written),
                        Some(summary.ports_written),
                    )
                    .await
                    .map_err(store_err)?;
                info!(job_id, hosts = summary.hosts_written, ports = summary.ports_written, "ingest workflow completed");
                Ok(())
            }
            Err(err) => {
                self.store
                    .advance(job_id, JobState::Failed, Some(err.to_string()), None, None)
                    .await
                    .map_err(store_err)?;
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        job_id: &str,
        contributor_id: &str,
        raw: &[u8],
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertSummary, StepError> {
        let scan = self.step_parse(job_id, raw).await?;
        let hosts = self.step_enrich(job_id, &scan).await?;
        let batch = UpsertBatch {
            scan_id: scan.scan_id.clone(),
            contributor_id: contributor_id.to_string(),
            observed_at,
            hosts,
        };
        self.step_upsert(job_id, batch).await
    }

    async fn step_parse(&self, job_id: &str, raw: &[u8]) -> Result<CanonicalScan, StepError> {
        if let Some(cached) = self.get_step_result_typed::<CanonicalScan>(job_id, "parse").await? {
            return Ok(cached);
        }
        let scan = mesh_parser::parse(raw).map_err(|err| StepError::Terminal(err.to_string()))?;
        self.put_step_result_typed(job_id, "parse", &scan).await?;
        Ok(scan)
    }

    async fn step_enrich(&self, job_id: &str, scan: &CanonicalScan) -> Result<Vec<EnrichedHost>, StepError> {
        if let Some(cached) = self.get_step_result_typed::<Vec<EnrichedHost>>(job_id, "enrich").await? {
            return Ok(cached);
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let watchdog_flag = Arc::clone(&cancelled);
        let budget = self.enrich_step_budget;
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            watchdog_flag.store(true, Ordering::Relaxed);
        });

        let mut hosts: Vec<EnrichedHost> = stream::iter(scan.hosts.iter())
            .map(|host| self.enrich_host(host, &cancelled))
            .buffer_unordered(self.host_concurrency)
            .collect()
            .await;
        watchdog.abort();
        hosts.sort_by(|a, b| a.ip.cmp(&b.ip));

        self.put_step_result_typed(job_id, "enrich", &hosts).await?;
        Ok(hosts)
    }

    async fn enrich_host(&self, host: &CanonicalHost, cancelled: &AtomicBool) -> EnrichedHost {
        let (asn_record, geo_record) =
            tokio::join!(self.asn.lookup(&host.ip, cancelled), self.geoip.lookup(&host.ip, cancelled));

        let mut ports = Vec::with_capacity(host.ports.len());
        for port in &host.ports {
            let name = service_name_for_port(port.number);
            let cpe = self.cpe.lookup(name, None, None, cancelled).await;
            ports.push(EnrichedPort {
                number: port.number,
                protocol: to_store_protocol(port.protocol),
                services: vec![EnrichedService {
                    name: name.to_string(),
                    product: None,
                    version: None,
                    cpe,
                }],
            });
        }

        EnrichedHost {
            ip: host.ip.clone(),
            asn: asn_record.asn,
            asn_org: asn_record.asn_org,
            city: geo_record.city,
            region: geo_record.region,
            country: geo_record.country,
            cloud_region: None,
            ports,
        }
    }

    async fn step_upsert(&self, job_id: &str, batch: UpsertBatch) -> Result<UpsertSummary, StepError> {
        if let Some(cached) = self.get_step_result_typed::<UpsertSummary>(job_id, "upsert").await? {
            return Ok(cached);
        }

        let store = &self.store;
        let summary = retry_with_backoff(|| async {
            store
                .upsert(batch.clone())
                .await
                .map_err(|err| StepError::Transient(err.to_string()))
        })
        .await?;

        self.put_step_result_typed(job_id, "upsert", &summary).await?;
        Ok(summary)
    }

    async fn get_step_result_typed<T: DeserializeOwned>(&self, job_id: &str, step: &str) -> Result<Option<T>, StepError> {
        let value = self
            .store
            .get_step_result(job_id, step)
            .await
            .map_err(store_err)?;
        match value {
            Some(raw) => serde_json::from_value(raw)
                .map(Some)
                .map_err(|err| StepError::Terminal(err.to_string())),
            None => Ok(None),
        }
    }

    async fn put_step_result_typed<T: Serialize>(&self, job_id: &str, step: &str, value: &T) -> Result<(), StepError> {
        let json = serde_json::to_value(value).map_err(|err| StepError::Terminal(err.to_string()))?;
        self.store.put_step_result(job_id, step, &json).await.map_err(store_err)
    }
}

fn store_err(err: mesh_store::StoreError) -> StepError {
    StepError::Transient(err.to_string())
}

fn to_store_protocol(protocol: mesh_parser::Protocol) -> StoreProtocol {
    match protocol {
        mesh_parser::Protocol::Tcp => StoreProtocol::Tcp,
        mesh_parser::Protocol::Udp => StoreProtocol::Udp,
    }
}

/// Canonical scans carry no service banner, so the only signal available for
/// CPE lookup is the port number itself. This maps well-known ports to the
/// service name a banner grab would typically report; unrecognised ports
/// still run through CPE lookup under the name `"unknown"` rather than being
/// skipped, since the mesh still wants to record their CPE-less presence.
fn service_name_for_port(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        123 => "ntp",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        161 => "snmp",
        389 => "ldap",
        443 => "https",
        445 => "microsoft-ds",
        465 => "smtps",
        587 => "submission",
        631 => "ipp",
        993 => "imaps",
        995 => "pop3s",
        1433 => "mssql",
        1521 => "oracle",
        2049 => "nfs",
        2375 => "docker",
        2379 => "etcd",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5672 => "amqp",
        5900 => "vnc",
        5984 => "couchdb",
        6379 => "redis",
        6443 => "kubernetes-api",
        7000 | 7001 => "cassandra",
        8080 => "http-proxy",
        8443 => "https-alt",
        9042 => "cassandra-native",
        9092 => "kafka",
        9200 => "elasticsearch",
        9300 => "elasticsearch-transport",
        11211 => "memcached",
        15672 => "rabbitmq-management",
        27017 => "mongodb",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_well_known_ports() {
        assert_eq!(service_name_for_port(22), "ssh");
        assert_eq!(service_name_for_port(443), "https");
        assert_eq!(service_name_for_port(65000), "unknown");
    }

    #[test]
    fn protocol_conversion_is_total() {
        assert_eq!(to_store_protocol(mesh_parser::Protocol::Tcp), StoreProtocol::Tcp);
        assert_eq!(to_store_protocol(mesh_parser::Protocol::Udp), StoreProtocol::Udp);
    }

    #[tokio::test]
    async fn enrich_step_cancels_lookups_not_yet_started_past_the_budget() {
        use mesh_parser::{CanonicalHost, CanonicalPort, CanonicalScan, Protocol};
        use mesh_store::MemoryStore;
        use serde_json::json;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"asn": 64500, "org": "Example Org", "city": "Berlin", "region": "Berlin", "country": "DE"}))
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::new(
            Arc::clone(&store),
            Arc::new(AsnAdapter::new(client.clone(), server.uri())),
            Arc::new(GeoIpAdapter::new(client.clone(), server.uri())),
            Arc::new(CpeAdapter::new(client, server.uri())),
        )
        .with_host_concurrency(1)
        .with_enrich_step_budget(Duration::from_millis(30));

        let scan = CanonicalScan {
            scan_id: "scan-cancel-1".into(),
            scanner_id: None,
            target: None,
            hosts: vec![
                CanonicalHost {
                    ip: "10.0.0.1".into(),
                    ports: vec![CanonicalPort { number: 22, protocol: Protocol::Tcp }],
                },
                CanonicalHost {
                    ip: "10.0.0.2".into(),
                    ports: vec![CanonicalPort { number: 22, protocol: Protocol::Tcp }],
                },
            ],
            dropped_records: 0,
        };

        // host_concurrency(1) processes hosts one at a time, so by the time
        // the second host's lookups start the first host's slow (150ms)
        // response has already blown through the 30ms enrich budget.
        let hosts = engine.step_enrich("job-cancel-1", &scan).await.unwrap();

        let first = hosts.iter().find(|h| h.ip == "10.0.0.1").unwrap();
        assert_eq!(first.asn, Some(64500));

        let second = hosts.iter().find(|h| h.ip == "10.0.0.2").unwrap();
        assert_eq!(second.asn, None, "second host's lookups should have been cancelled before they started");
        assert_eq!(second.city, None);
    }
}
