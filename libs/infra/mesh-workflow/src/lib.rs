//! Turns a submitted scan into enriched graph state. Parsing, enrichment
//! and the upsert each run as a discrete step whose result is durably
//! recorded before the next step starts, so a restart after a crash resumes
//! instead of repeating enrichment calls or re-running the upsert.

pub mod engine;
pub mod retry;

pub use engine::WorkflowEngine;
pub use retry::StepError;
