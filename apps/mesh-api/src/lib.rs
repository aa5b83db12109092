//! Library root for the mesh intelligence HTTP surface. `main.rs` wires
//! this crate's `Config`, `AppState` and `routes::build_router` together
//! and launches the dispatch reaper alongside the server. Bootstrap logic
//! lives in the library so it's reachable from integration tests.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::Config;
pub use state::AppState;
