//! Binary entry point. Bootstrap order: load `.env`, init tracing, connect
//! the store, build shared state, then launch background daemons before
//! the HTTP listener so nothing races a request against an
//! un-initialised dependency.

use std::net::SocketAddr;
use std::sync::Arc;

use mesh_api::{services, AppState, Config};
use mesh_store::{LibsqlStore, Store, StoreClient};
use mesh_telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing("mesh-api");

    let client = StoreClient::connect(&config.store_url, config.store_pass.clone()).await?;
    let store: Arc<dyn Store> = Arc::new(LibsqlStore::new(client));

    let state = AppState::new(&config, store);

    tokio::spawn(services::reaper::run(state.clone()));

    let addr: SocketAddr = config.api_bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "mesh-api listening");

    let router = mesh_api::routes::build_router(state);
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
