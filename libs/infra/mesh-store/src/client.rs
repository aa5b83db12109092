//! Connection bootstrap: branch on URL scheme for local vs. remote, and
//! anchor an open connection for in-memory URLs so the schema survives
//! between pooled connections in tests.

use std::sync::Arc;

use libsql::{Builder, Connection, Database};
use tracing::{info, instrument};

use crate::errors::StoreError;
use crate::schema;

#[derive(Clone)]
pub struct StoreClient {
    database: Arc<Database>,
    _memory_anchor: Option<Arc<Connection>>,
}

impl StoreClient {
    #[instrument(skip(auth_token))]
    pub async fn connect(url: &str, auth_token: Option<String>) -> Result<Self, StoreError> {
        if url.is_empty() {
            return Err(StoreError::Connection("STORE_URL is empty".into()));
        }

        let is_remote = url.starts_with("libsql://") || url.starts_with("https://");
        let is_memory = url.contains(":memory:") || url.contains("mode=memory");

        info!(url, is_remote, "connecting to store");

        let database = if is_remote {
            let token = auth_token
                .ok_or_else(|| StoreError::Connection("remote store requires STORE_PASS as auth token".into()))?;
            Builder::new_remote(url.to_string(), token)
                .build()
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?
        } else {
            Builder::new_local(url)
                .build()
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?
        };

        let database = Arc::new(database);

        // A local in-memory database is purged the moment its last
        // connection drops. Holding one open connection alive for the
        // lifetime of the client keeps the schema resident for every
        // connection pulled from the pool afterwards.
        let anchor = if is_memory {
            let conn = database
                .connect()
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            schema::apply(&conn)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            Some(Arc::new(conn))
        } else {
            let conn = database
                .connect()
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            schema::apply(&conn)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            None
        };

        Ok(Self {
            database,
            _memory_anchor: anchor,
        })
    }

    pub fn connection(&self) -> Result<Connection, StoreError> {
        self.database
            .connect()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}
