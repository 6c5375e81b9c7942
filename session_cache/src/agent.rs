use std::sync::Arc;

use bytes::Bytes;
use cache_types::AccessMode;
use tracing::{info, warn};

use crate::entry::CacheSlot;
use crate::error::{CacheError, Result};
use crate::remote::RemoteStore;

/// Drives the coherence state machine of the one [`CacheSlot`] against the
/// server. Clones share the same slot and transport, so the session loop,
/// the writeback monitor, and the callback endpoint all observe one cache.
#[derive(Clone)]
pub struct CacheAgent {
    slot: CacheSlot,
    store: Arc<dyn RemoteStore>,
}

impl CacheAgent {
    pub fn new(slot: CacheSlot, store: Arc<dyn RemoteStore>) -> Self {
        CacheAgent { slot, store }
    }

    pub fn slot(&self) -> &CacheSlot {
        &self.slot
    }

    pub fn hit(&self, filename: &str, mode: AccessMode) -> bool {
        self.slot.hit(filename, mode)
    }

    /// Fetches `filename` from the server with the requested mode. The state
    /// pre-transition is applied before the RPC; a transport failure rolls
    /// the slot back to `Invalid` and surfaces the error to the caller, who
    /// may retry or abandon the request.
    pub async fn download(&self, filename: &str, mode: AccessMode) -> Result<()> {
        info!("downloading '{filename}' with mode {mode}");
        self.slot.begin_download(filename, mode);
        match self.store.download(filename, mode).await {
            Ok(bytes) => {
                self.slot.complete_download(bytes);
                Ok(())
            }
            Err(e) => {
                warn!("download of '{filename}' failed: {e}");
                self.slot.fail_download();
                Err(e)
            }
        }
    }

    /// Pushes the cached bytes back to the server. The post-transition is
    /// applied only after the RPC succeeds; on transport failure the slot is
    /// left unchanged so the caller can retry. A stale rejection means the
    /// server has already revoked this ownership, so the local copy is
    /// dropped rather than allowed to shadow newer canonical bytes.
    pub async fn upload(&self) -> Result<()> {
        let payload = self.slot.upload_payload().ok_or(CacheError::NothingToUpload)?;
        info!("uploading '{}' ({} bytes, release={})", payload.name, payload.bytes.len(), payload.release);
        match self.store.upload(&payload.name, payload.bytes, payload.release).await {
            Ok(()) => {
                self.slot.commit_upload();
                info!("upload of '{}' completed", payload.name);
                Ok(())
            }
            Err(CacheError::StaleUpload) => {
                warn!("upload of '{}' rejected as stale; discarding local edits", payload.name);
                self.slot.reset();
                Err(CacheError::StaleUpload)
            }
            Err(e) => {
                warn!("upload of '{}' failed: {e}", payload.name);
                Err(e)
            }
        }
    }

    /// Bytes currently held in the slot.
    pub fn bytes(&self) -> Bytes {
        self.slot.bytes()
    }
}
