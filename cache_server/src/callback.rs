use cache_types::CallbackResponse;
use session_cache::CacheSlot;
use tracing::debug;

use crate::error::{Result, ServerError};

/// Server-to-client callback contract, one handle per holder. A `false`
/// answer means the client's cache was not in a state the callback applies
/// to; the caller logs the disagreement and does not treat it as fatal.
#[async_trait::async_trait]
pub trait ClientCallback: Send + Sync {
    async fn invalidate(&self) -> Result<bool>;
    async fn writeback(&self) -> Result<bool>;
}

/// Reaches a client's callback endpoint over HTTP.
#[derive(Debug)]
pub struct HttpCallback {
    http: reqwest::Client,
    base: String,
}

impl HttpCallback {
    /// `addr` is the `host:port` the client advertised in its download
    /// request.
    pub fn new(addr: &str) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        HttpCallback {
            http: reqwest::Client::new(),
            base,
        }
    }

    async fn post(&self, route: &str) -> Result<bool> {
        let url = format!("{}{route}", self.base);
        debug!("callback POST {url}");
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| ServerError::Callback(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ServerError::Callback(format!("{url} answered {}", response.status())));
        }
        let answer: CallbackResponse = response
            .json()
            .await
            .map_err(|e| ServerError::Callback(e.to_string()))?;
        Ok(answer.accepted)
    }
}

#[async_trait::async_trait]
impl ClientCallback for HttpCallback {
    async fn invalidate(&self) -> Result<bool> {
        self.post("/v1/cache/invalidate").await
    }

    async fn writeback(&self) -> Result<bool> {
        self.post("/v1/cache/writeback").await
    }
}

/// In-process callback handle wrapping a client's [`CacheSlot`] directly.
/// Used when client and server share a process (tests, local deployments).
#[derive(Debug, Clone)]
pub struct SlotCallback {
    slot: CacheSlot,
}

impl SlotCallback {
    pub fn new(slot: CacheSlot) -> Self {
        SlotCallback { slot }
    }
}

#[async_trait::async_trait]
impl ClientCallback for SlotCallback {
    async fn invalidate(&self) -> Result<bool> {
        Ok(self.slot.invalidate())
    }

    async fn writeback(&self) -> Result<bool> {
        Ok(self.slot.writeback())
    }
}
