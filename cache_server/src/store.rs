use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{Result, ServerError};

/// Canonical byte store backing the ownership table. The on-disk format is
/// opaque to the coherence protocol; a filename unknown to the store reads
/// as empty, so the first download of a new name starts an empty file.
#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    async fn load(&self, filename: &str) -> Result<Bytes>;
    async fn save(&self, filename: &str, bytes: &Bytes) -> Result<()>;
}

/// Disk-backed store keeping each file under a single data directory.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(DiskStore { root })
    }

    fn path_for(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }
}

/// Filenames are flat keys, one path segment each; anything that could
/// escape the data directory is refused.
fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(ServerError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl FileStore for DiskStore {
    async fn load(&self, filename: &str) -> Result<Bytes> {
        let path = self.path_for(filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("'{filename}' not in store yet, serving empty contents");
                Ok(Bytes::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, filename: &str, bytes: &Bytes) -> Result<()> {
        let path = self.path_for(filename)?;
        write_atomically(&self.root, &path, bytes)?;
        info!("'{filename}' committed to {path:?} ({} bytes)", bytes.len());
        Ok(())
    }
}

/// Stages into a temp file in the same directory, then persists over the
/// target, so a crashed commit never leaves a torn canonical file.
fn write_atomically(root: &Path, path: &Path, bytes: &Bytes) -> Result<()> {
    let tempfile = tempfile::Builder::new()
        .prefix(&format!("{}.", std::process::id()))
        .tempfile_in(root)
        .map_err(|e| ServerError::Other(format!("unable to stage '{path:?}': {e}")))?;

    {
        let mut writer = std::io::BufWriter::new(&tempfile);
        writer.write_all(bytes)?;
        writer.flush()?;
    }

    tempfile.persist(path).map_err(|e| ServerError::IOError(e.error))?;
    Ok(())
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait::async_trait]
impl FileStore for MemoryStore {
    async fn load(&self, filename: &str) -> Result<Bytes> {
        validate_filename(filename)?;
        Ok(self.files.read().get(filename).cloned().unwrap_or_default())
    }

    async fn save(&self, filename: &str, bytes: &Bytes) -> Result<()> {
        validate_filename(filename)?;
        self.files.write().insert(filename.to_string(), bytes.clone());
        Ok(())
    }
}
