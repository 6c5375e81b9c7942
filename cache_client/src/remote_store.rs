use bytes::Bytes;
use cache_types::{AccessMode, ClientId, DownloadRequest, UploadParams};
use reqwest::StatusCode;
use session_cache::{CacheError, RemoteStore};
use tracing::debug;

/// HTTP implementation of the client-to-server transport. Carries this
/// client's identity and the callback address the server revokes through.
#[derive(Debug)]
pub struct HttpStore {
    http: reqwest::Client,
    endpoint: String,
    client_id: ClientId,
    callback_addr: String,
}

impl HttpStore {
    pub fn new(endpoint: &str, client_id: ClientId, callback_addr: String) -> Self {
        HttpStore {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client_id,
            callback_addr,
        }
    }

    /// Startup probe: confirms the server answers at all before the
    /// interactive loop begins.
    pub async fn health_check(&self) -> session_cache::Result<()> {
        let url = format!("{}/health", self.endpoint);
        let response = self.http.get(&url).send().await.map_err(transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CacheError::Denied(format!("health check answered {}", response.status())))
        }
    }
}

fn transport(e: reqwest::Error) -> CacheError {
    CacheError::Transport(e.to_string())
}

async fn denial(what: &str, response: reqwest::Response) -> CacheError {
    let status = response.status();
    let detail = response.text().await.unwrap_or_default();
    CacheError::Denied(format!("{what} answered {status}: {detail}"))
}

#[async_trait::async_trait]
impl RemoteStore for HttpStore {
    async fn download(&self, filename: &str, mode: AccessMode) -> session_cache::Result<Bytes> {
        let url = format!("{}/v1/files/{filename}/download", self.endpoint);
        debug!("POST {url} mode {mode}");
        let request = DownloadRequest {
            client_id: self.client_id.clone(),
            mode,
            callback_addr: self.callback_addr.clone(),
        };
        let response = self.http.post(&url).json(&request).send().await.map_err(transport)?;
        match response.status() {
            StatusCode::OK => response.bytes().await.map_err(transport),
            _ => Err(denial("download", response).await),
        }
    }

    async fn upload(&self, filename: &str, bytes: Bytes, release: bool) -> session_cache::Result<()> {
        let url = format!("{}/v1/files/{filename}/upload", self.endpoint);
        debug!("POST {url} ({} bytes, release={release})", bytes.len());
        let params = UploadParams {
            client_id: self.client_id.clone(),
            release,
        };
        let response = self
            .http
            .post(&url)
            .query(&params)
            .body(bytes)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => Err(CacheError::StaleUpload),
            _ => Err(denial("upload", response).await),
        }
    }
}
