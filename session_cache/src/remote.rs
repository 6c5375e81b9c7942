use bytes::Bytes;
use cache_types::AccessMode;

use crate::error::Result;

/// Client-to-server transport contract. An implementation carries the
/// client's identity and callback endpoint; any RPC substrate that can
/// deliver these two calls and report failure qualifies.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Requests the canonical bytes of `filename` with the given mode. The
    /// server may revoke or demote other clients' copies before answering.
    async fn download(&self, filename: &str, mode: AccessMode) -> Result<Bytes>;

    /// Commits locally modified bytes back to the server. `release` gives up
    /// ownership entirely instead of demoting to a shared read copy.
    async fn upload(&self, filename: &str, bytes: Bytes, release: bool) -> Result<()>;
}
