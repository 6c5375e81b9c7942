use session_cache::CacheError;
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    #[error("editor: {0}")]
    Editor(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
