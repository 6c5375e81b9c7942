use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use super::handlers;
use crate::error::{Result, ServerError};
use crate::ownership::{OwnershipTable, DEFAULT_CALLBACK_TIMEOUT};
use crate::store::{DiskStore, FileStore, MemoryStore};

/// Configuration for the coherence server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding the canonical file bytes. Ignored with `in_memory`.
    pub data_directory: PathBuf,
    /// Network interface to bind to (e.g., "127.0.0.1" or "0.0.0.0").
    pub host: String,
    /// TCP port number for the HTTP server.
    pub port: u16,
    /// Keep canonical bytes in memory instead of on disk.
    pub in_memory: bool,
    /// How long a download may block on an exclusive holder's writeback
    /// before the holder is revoked.
    pub callback_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            data_directory: PathBuf::from("./file_cache_data"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            in_memory: false,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

/// HTTP server exposing the ownership table to remote clients.
pub struct CoherenceServer {
    config: ServerConfig,
    table: Arc<OwnershipTable>,
}

impl CoherenceServer {
    /// Creates a server with a disk-backed store under the configured data
    /// directory, or an in-memory store when `in_memory` is set.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let store: Arc<dyn FileStore> = if config.in_memory {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(DiskStore::new(&config.data_directory)?)
        };
        let table = Arc::new(OwnershipTable::new(store, config.callback_timeout));
        Ok(CoherenceServer { config, table })
    }

    /// Creates a server over an existing table. Useful when tests want to
    /// inspect the table while the server is running.
    pub fn from_table(table: Arc<OwnershipTable>, host: String, port: u16) -> Self {
        CoherenceServer {
            config: ServerConfig {
                host,
                port,
                ..ServerConfig::default()
            },
            table,
        }
    }

    pub fn table(&self) -> Arc<OwnershipTable> {
        self.table.clone()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .nest(
                "/v1",
                Router::new()
                    .route("/files/{filename}/download", post(handlers::download))
                    .route("/files/{filename}/upload", post(handlers::upload)),
            )
            .layer(CorsLayer::very_permissive())
            .with_state(handlers::ServerState {
                table: self.table.clone(),
            })
    }

    /// Runs the server on the configured address until the process exits.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Runs the server until a shutdown signal arrives on the channel.
    pub async fn run_until_stopped(&self, shutdown_rx: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, async {
            let _ = shutdown_rx.await;
        })
        .await
    }

    /// Binds the configured address. Exposed separately so callers (tests in
    /// particular) can bind port 0 and read the actual address back.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self
            .addr()
            .parse()
            .map_err(|e| ServerError::Other(format!("failed to parse address {}: {e}", self.addr())))?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Other(format!("failed to bind to {addr}: {e}")))
    }

    /// Serves requests on an already bound listener until `shutdown`
    /// completes.
    pub async fn serve(&self, listener: TcpListener, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("coherence server listening on {addr}");
        }
        let router = self.create_router();
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Other(format!("server error: {e}")))
    }
}
