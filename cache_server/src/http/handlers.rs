//! Request handlers bridging HTTP to the ownership table.
//!
//! Each handler extracts the request data, calls the table, and maps the
//! result to a response; errors become status codes via [`error_to_response`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use cache_types::{DownloadRequest, UploadParams, UploadResponse};
use tracing::debug;

use crate::callback::HttpCallback;
use crate::error::ServerError;
use crate::ownership::OwnershipTable;

#[derive(Clone)]
pub struct ServerState {
    pub table: Arc<OwnershipTable>,
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn download(
    State(state): State<ServerState>,
    Path(filename): Path<String>,
    Json(request): Json<DownloadRequest>,
) -> Response {
    debug!(
        "download '{filename}' mode {} from {} (callback {})",
        request.mode, request.client_id, request.callback_addr
    );
    let callback = Arc::new(HttpCallback::new(&request.callback_addr));
    match state.table.download(&request.client_id, callback, &filename, request.mode).await {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(e) => error_to_response(e),
    }
}

pub async fn upload(
    State(state): State<ServerState>,
    Path(filename): Path<String>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Response {
    debug!("upload '{filename}' from {} ({} bytes, release={})", params.client_id, body.len(), params.release);
    match state.table.upload(&params.client_id, &filename, body, params.release).await {
        Ok(()) => Json(UploadResponse { committed: true }).into_response(),
        Err(e) => error_to_response(e),
    }
}

fn error_to_response(error: ServerError) -> Response {
    let status = match &error {
        ServerError::StaleUpload { .. } => StatusCode::CONFLICT,
        ServerError::InvalidFilename(_) => StatusCode::BAD_REQUEST,
        ServerError::Callback(_) => StatusCode::BAD_GATEWAY,
        ServerError::IOError(_) | ServerError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}
