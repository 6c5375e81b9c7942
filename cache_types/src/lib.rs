use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity a client presents to the file server. The server tracks holders
/// of each file by this value, so it must be stable for the lifetime of the
/// client process and unique across concurrently running clients.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd, Clone)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        ClientId(value.to_string())
    }
}

/// Access mode requested for a checked-out file. Serialized on the wire as
/// the same `r`/`w` tokens the interactive prompt accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "w")]
    Write,
}

impl AccessMode {
    pub fn is_write(&self) -> bool {
        matches!(self, AccessMode::Write)
    }
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => write!(f, "r"),
            AccessMode::Write => write!(f, "w"),
        }
    }
}

impl FromStr for AccessMode {
    type Err = UnknownAccessMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "r" => Ok(AccessMode::Read),
            "w" => Ok(AccessMode::Write),
            other => Err(UnknownAccessMode(other.to_string())),
        }
    }
}

/// Error returned when parsing an access mode from user or wire input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAccessMode(pub String);

impl Display for UnknownAccessMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown access mode '{}', expected 'r' or 'w'", self.0)
    }
}

impl std::error::Error for UnknownAccessMode {}

/// Body of a download request. `callback_addr` is the `host:port` of the
/// HTTP endpoint this client answers `invalidate`/`writeback` callbacks on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub client_id: ClientId,
    pub mode: AccessMode,
    pub callback_addr: String,
}

/// Query parameters of an upload request. The file contents travel as the
/// raw request body. `release` distinguishes giving up ownership entirely
/// (replacement, client exit) from the demotion back to a shared read copy
/// after a writeback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadParams {
    pub client_id: ClientId,
    #[serde(default)]
    pub release: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub committed: bool,
}

/// Answer to a server-initiated callback. `accepted = false` means the
/// client's cache was not in a state the callback applies to; the server
/// logs the disagreement and moves on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub accepted: bool,
}
