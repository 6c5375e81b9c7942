use std::sync::Arc;

use bytes::Bytes;
use cache_types::{AccessMode, ClientId};
use session_cache::{CacheError, RemoteStore};

use crate::callback::ClientCallback;
use crate::error::ServerError;
use crate::ownership::OwnershipTable;

/// In-process transport: a per-client handle that calls straight into the
/// ownership table. Fills the same role the HTTP transport does for a
/// remote server, which makes it the natural wiring for tests and
/// single-process deployments.
pub struct DirectStore {
    table: Arc<OwnershipTable>,
    client_id: ClientId,
    callback: Arc<dyn ClientCallback>,
}

impl DirectStore {
    pub fn new(table: Arc<OwnershipTable>, client_id: ClientId, callback: Arc<dyn ClientCallback>) -> Self {
        DirectStore {
            table,
            client_id,
            callback,
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for DirectStore {
    async fn download(&self, filename: &str, mode: AccessMode) -> session_cache::Result<Bytes> {
        let bytes = self
            .table
            .download(&self.client_id, self.callback.clone(), filename, mode)
            .await?;
        Ok(bytes)
    }

    async fn upload(&self, filename: &str, bytes: Bytes, release: bool) -> session_cache::Result<()> {
        self.table.upload(&self.client_id, filename, bytes, release).await?;
        Ok(())
    }
}

impl From<ServerError> for CacheError {
    fn from(value: ServerError) -> Self {
        match value {
            ServerError::StaleUpload { .. } => CacheError::StaleUpload,
            ServerError::InvalidFilename(name) => CacheError::Denied(format!("invalid filename: {name}")),
            other => CacheError::Transport(other.to_string()),
        }
    }
}
