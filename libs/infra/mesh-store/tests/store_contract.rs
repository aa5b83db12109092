//! Runs the same behavioral contract against both store backends so a
//! regression introduced in one doesn't hide behind the other's test suite.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use mesh_models::JobState;
use mesh_store::{
    EnrichedHost, EnrichedPort, EnrichedService, GraphQuery, LibsqlStore, MemoryStore, Protocol, Store, StoreClient,
    StoreError, UpsertBatch,
};

fn sample_batch(ip: &str, asn: u32) -> UpsertBatch {
    UpsertBatch {
        scan_id: "scan-1".into(),
        contributor_id: "contributor-1".into(),
        observed_at: Utc::now(),
        hosts: vec![EnrichedHost {
            ip: ip.into(),
            asn: Some(asn),
            asn_org: Some("Example Org".into()),
            city: Some("Berlin".into()),
            region: Some("Berlin".into()),
            country: Some("DE".into()),
            cloud_region: None,
            ports: vec![EnrichedPort {
                number: 443,
                protocol: Protocol::Tcp,
                services: vec![EnrichedService {
                    name: "https".into(),
                    product: Some("nginx".into()),
                    version: Some("1.18.0".into()),
                    cpe: BTreeSet::from(["cpe:2.3:a:nginx:nginx:1.18.0:*:*:*:*:*:*:*".to_string()]),
                }],
            }],
        }],
    }
}

async fn upsert_is_idempotent(store: &dyn Store) {
    let batch = sample_batch("203.0.113.10", 64500);
    let first = store.upsert(batch.clone()).await.unwrap();
    let second = store.upsert(batch).await.unwrap();
    assert_eq!(first.hosts_written, second.hosts_written);

    let view = store.host_view("203.0.113.10", 2).await.unwrap().unwrap();
    assert_eq!(view.asn, Some(64500));
    let ports = view.ports.unwrap();
    assert_eq!(ports.len(), 1);
}

async fn by_asn_query_finds_upserted_host(store: &dyn Store) {
    store.upsert(sample_batch("203.0.113.20", 64501)).await.unwrap();
    let page = store.graph_query(GraphQuery::ByAsn { asn: 64501 }, 10, 0).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].ip, "203.0.113.20");
}

async fn job_state_machine_rejects_illegal_transitions(store: &dyn Store) {
    let job = store.create(Some("contributor-1".into())).await.unwrap();
    assert_eq!(job.state, JobState::Pending);

    let err = store.advance(&job.id, JobState::Completed, None, None, None).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition));

    let advanced = store.advance(&job.id, JobState::Processing, None, None, None).await.unwrap();
    assert_eq!(advanced.state, JobState::Processing);
}

async fn empty_index_is_distinct_from_no_matches(store: &dyn Store) {
    let err = store.similar(&vec![0.0; 1536], 5, 0.0).await.unwrap_err();
    assert!(matches!(err, StoreError::EmptyIndex));
}

async fn run_contract(store: Arc<dyn Store>) {
    upsert_is_idempotent(store.as_ref()).await;
    by_asn_query_finds_upserted_host(store.as_ref()).await;
    job_state_machine_rejects_illegal_transitions(store.as_ref()).await;
    empty_index_is_distinct_from_no_matches(store.as_ref()).await;
}

#[tokio::test]
async fn memory_store_satisfies_the_contract() {
    run_contract(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn libsql_store_satisfies_the_contract() {
    let client = StoreClient::connect(":memory:", None).await.unwrap();
    run_contract(Arc::new(LibsqlStore::new(client))).await;
}
