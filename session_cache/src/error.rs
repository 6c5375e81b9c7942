use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server denied the request: {0}")]
    Denied(String),

    #[error("upload rejected as stale; the server revoked this ownership")]
    StaleUpload,

    #[error("no write session to upload")]
    NothingToUpload,

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl PartialEq for CacheError {
    fn eq(&self, other: &CacheError) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
