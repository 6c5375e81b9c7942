use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use cache_types::CallbackResponse;
use session_cache::CacheSlot;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{ClientError, Result};

/// The RPC endpoint each client runs so the server can call back into it.
/// Callbacks are answered straight from the shared [`CacheSlot`] guards;
/// the response reports whether the slot was in a state the callback
/// applies to.
pub struct CallbackServer {
    advertised: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CallbackServer {
    /// Binds `host:port` (port 0 picks an ephemeral port) and starts
    /// serving. Failing to bind is an unrecoverable startup error for the
    /// client: without a callback endpoint the server could never revoke
    /// our copies.
    pub async fn start(slot: CacheSlot, host: &str, port: u16) -> Result<CallbackServer> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| ClientError::Other(format!("failed to bind callback endpoint on {host}:{port}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| ClientError::Other(format!("callback endpoint address unavailable: {e}")))?;
        let advertised = format!("{host}:{}", local.port());
        info!("callback endpoint listening on {advertised}");

        let router = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/v1/cache/invalidate", post(invalidate))
            .route("/v1/cache/writeback", post(writeback))
            .with_state(slot);

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(e) = serve.await {
                error!("callback endpoint failed: {e}");
            }
        });

        Ok(CallbackServer {
            advertised,
            shutdown: Some(tx),
            handle,
        })
    }

    /// The `host:port` to advertise in download requests.
    pub fn advertised_addr(&self) -> &str {
        &self.advertised
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

async fn invalidate(State(slot): State<CacheSlot>) -> Json<CallbackResponse> {
    Json(CallbackResponse {
        accepted: slot.invalidate(),
    })
}

async fn writeback(State(slot): State<CacheSlot>) -> Json<CallbackResponse> {
    Json(CallbackResponse {
        accepted: slot.writeback(),
    })
}
