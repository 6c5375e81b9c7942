//! Scripted in-memory [`RemoteStore`] double shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use cache_types::AccessMode;
use parking_lot::Mutex;

use crate::error::{CacheError, Result};
use crate::remote::RemoteStore;

#[derive(Default)]
pub(crate) struct FakeStore {
    files: Mutex<HashMap<String, Bytes>>,
    uploads: Mutex<HashMap<String, (Bytes, bool)>>,
    downloads_to_fail: AtomicUsize,
    uploads_to_fail: AtomicUsize,
    stale: AtomicBool,
}

impl FakeStore {
    pub fn with_file(name: &str, bytes: &'static [u8]) -> Self {
        let store = FakeStore::default();
        store.files.lock().insert(name.to_string(), Bytes::from_static(bytes));
        store
    }

    /// Makes the next `n` downloads fail with a transport error.
    pub fn fail_downloads(&self, n: usize) {
        self.downloads_to_fail.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` uploads fail with a transport error.
    pub fn fail_uploads(&self, n: usize) {
        self.uploads_to_fail.store(n, Ordering::SeqCst);
    }

    /// Makes every subsequent upload fail with the stale rejection.
    pub fn reject_uploads_as_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn last_upload(&self, name: &str) -> Option<(Bytes, bool)> {
        self.uploads.lock().get(name).cloned()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl RemoteStore for FakeStore {
    async fn download(&self, filename: &str, _mode: AccessMode) -> Result<Bytes> {
        if Self::take_failure(&self.downloads_to_fail) {
            return Err(CacheError::Transport("injected download failure".to_string()));
        }
        Ok(self.files.lock().get(filename).cloned().unwrap_or_default())
    }

    async fn upload(&self, filename: &str, bytes: Bytes, release: bool) -> Result<()> {
        if self.stale.load(Ordering::SeqCst) {
            return Err(CacheError::StaleUpload);
        }
        if Self::take_failure(&self.uploads_to_fail) {
            return Err(CacheError::Transport("injected upload failure".to_string()));
        }
        self.files.lock().insert(filename.to_string(), bytes.clone());
        self.uploads.lock().insert(filename.to_string(), (bytes, release));
        Ok(())
    }
}
