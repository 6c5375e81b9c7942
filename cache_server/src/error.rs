use cache_types::ClientId;
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("stale upload of '{filename}' from {client}: not the current owner")]
    StaleUpload { client: ClientId, filename: String },

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("callback transport failure: {0}")]
    Callback(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl PartialEq for ServerError {
    fn eq(&self, other: &ServerError) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
