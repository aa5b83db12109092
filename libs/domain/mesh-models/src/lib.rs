//! Domain entities shared between the ingest pipeline and the query engine.
//!
//! Every type here is a plain DTO: construction and validation live with the
//! components that own the corresponding lifecycle (the upserter for graph
//! nodes, the job store for `Job`).

pub mod edge;
pub mod host;
pub mod job;
pub mod port;
pub mod service;
pub mod vuln;

pub use edge::{Edge, ObservationEdge, Relation};
pub use host::Host;
pub use job::{Job, JobFilter, JobOrderBy, JobState};
pub use port::{Port, Protocol};
pub use service::{Banner, Service, TlsCert};
pub use vuln::{Severity, Vuln, VulnDoc, EMBEDDING_DIMENSION};
