use std::sync::Arc;

use bytes::Bytes;
use cache_types::AccessMode;
use parking_lot::Mutex;
use tracing::{debug, info};

/// Coherence state of the single cached file slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No valid local copy.
    Invalid,
    /// Valid read-only copy; the server may revoke it via `invalidate`.
    ReadShared,
    /// Exclusive writable copy; the server may request `writeback`.
    WriteOwned,
    /// The write session is over; the bytes must be pushed to the server
    /// before the file returns to `ReadShared`.
    PendingWriteback,
}

/// The one in-memory slot holding a checked-out file.
///
/// `name` and `bytes` are meaningful only when `state != Invalid`.
#[derive(Debug)]
pub struct CacheEntry {
    name: String,
    state: CacheState,
    bytes: Bytes,
    ownership: bool,
}

impl CacheEntry {
    fn new() -> Self {
        CacheEntry {
            name: String::new(),
            state: CacheState::Invalid,
            bytes: Bytes::new(),
            ownership: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn ownership(&self) -> bool {
        self.ownership
    }
}

/// Snapshot of what an upload will send, captured under the slot lock so the
/// RPC itself runs without holding it.
#[derive(Debug, Clone)]
pub(crate) struct UploadPayload {
    pub name: String,
    pub bytes: Bytes,
    /// True when the upload gives up ownership entirely (replacement or
    /// client exit) rather than demoting to a shared read copy.
    pub release: bool,
}

impl Default for CacheEntry {
    fn default() -> Self {
        CacheEntry::new()
    }
}

/// The guarded cache slot shared by the session loop, the writeback monitor,
/// and the callback endpoint. All accessors take the lock briefly and never
/// hold it across an await point.
#[derive(Debug, Clone, Default)]
pub struct CacheSlot {
    inner: Arc<Mutex<CacheEntry>>,
}

impl CacheSlot {
    pub fn new() -> Self {
        CacheSlot {
            inner: Arc::new(Mutex::new(CacheEntry::new())),
        }
    }

    pub fn state(&self) -> CacheState {
        self.inner.lock().state
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn bytes(&self) -> Bytes {
        self.inner.lock().bytes.clone()
    }

    pub fn is_write_owned(&self) -> bool {
        self.state() == CacheState::WriteOwned
    }

    pub fn is_pending_writeback(&self) -> bool {
        self.state() == CacheState::PendingWriteback
    }

    /// Replaces the cached bytes after a local edit session.
    pub fn set_bytes(&self, bytes: Bytes) {
        self.inner.lock().bytes = bytes;
    }

    /// True iff `name` is the cached file, no writeback is pending, and the
    /// current state satisfies `mode` (`Read` is satisfied by a read-shared
    /// or write-owned copy, `Write` only by a write-owned one).
    pub fn hit(&self, name: &str, mode: AccessMode) -> bool {
        let entry = self.inner.lock();
        if entry.name != name {
            debug!("cache miss: '{name}' is not cached");
            return false;
        }
        if entry.state == CacheState::PendingWriteback {
            debug!("cache miss: '{name}' must be written back first");
            return false;
        }
        match mode {
            AccessMode::Read => entry.state != CacheState::Invalid,
            AccessMode::Write => entry.state == CacheState::WriteOwned,
        }
    }

    /// Server callback: drop a read-shared copy. Returns true iff the slot
    /// was `ReadShared`; any other state is left untouched (invalidating a
    /// write-owned copy would discard local edits, so the disagreement is
    /// reported back to the server instead).
    pub fn invalidate(&self) -> bool {
        let mut entry = self.inner.lock();
        if entry.state == CacheState::ReadShared {
            entry.state = CacheState::Invalid;
            info!("cache entry '{}' invalidated", entry.name);
            true
        } else {
            debug!("invalidate refused in state {:?}", entry.state);
            false
        }
    }

    /// Server callback: schedule the write-owned copy for upload. Returns
    /// true iff the slot was `WriteOwned`, transitioning it to
    /// `PendingWriteback` for the monitor to pick up.
    pub fn writeback(&self) -> bool {
        let mut entry = self.inner.lock();
        if entry.state == CacheState::WriteOwned {
            entry.state = CacheState::PendingWriteback;
            info!("writeback of '{}' scheduled", entry.name);
            true
        } else {
            debug!("writeback refused in state {:?}", entry.state);
            false
        }
    }

    /// Applies the download pre-transition for `mode` and records the new
    /// name and ownership flag. The bytes arrive in [`complete_download`].
    pub(crate) fn begin_download(&self, name: &str, mode: AccessMode) {
        let mut entry = self.inner.lock();
        entry.state = match (entry.state, mode) {
            (CacheState::Invalid, AccessMode::Read) => CacheState::ReadShared,
            (CacheState::Invalid, AccessMode::Write) => CacheState::WriteOwned,
            (CacheState::ReadShared, AccessMode::Write) => CacheState::WriteOwned,
            (state, _) => state,
        };
        entry.name = name.to_string();
        entry.ownership = mode.is_write();
    }

    pub(crate) fn complete_download(&self, bytes: Bytes) {
        self.inner.lock().bytes = bytes;
    }

    /// Rolls the speculative download transition back to `Invalid`.
    pub(crate) fn fail_download(&self) {
        let mut entry = self.inner.lock();
        entry.state = CacheState::Invalid;
        entry.ownership = false;
    }

    /// Snapshots the upload payload, or `None` when the slot holds nothing
    /// uploadable. `release` is decided by the state at snapshot time: a
    /// still write-owned copy is being given up, a pending one demotes back
    /// to a read copy.
    pub(crate) fn upload_payload(&self) -> Option<UploadPayload> {
        let entry = self.inner.lock();
        match entry.state {
            CacheState::WriteOwned => Some(UploadPayload {
                name: entry.name.clone(),
                bytes: entry.bytes.clone(),
                release: true,
            }),
            CacheState::PendingWriteback => Some(UploadPayload {
                name: entry.name.clone(),
                bytes: entry.bytes.clone(),
                release: false,
            }),
            _ => None,
        }
    }

    /// Applies the upload post-transition. The state is re-read here rather
    /// than carried over from the snapshot: a `writeback` callback may have
    /// landed while the RPC was in flight.
    pub(crate) fn commit_upload(&self) {
        let mut entry = self.inner.lock();
        match entry.state {
            CacheState::WriteOwned => {
                entry.state = CacheState::Invalid;
                entry.ownership = false;
            }
            CacheState::PendingWriteback => entry.state = CacheState::ReadShared,
            _ => {}
        }
    }

    /// Drops the local copy entirely. Used when the server rejected an
    /// upload as stale: the canonical bytes have moved on without us.
    pub(crate) fn reset(&self) {
        let mut entry = self.inner.lock();
        entry.state = CacheState::Invalid;
        entry.ownership = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_shared_slot(name: &str) -> CacheSlot {
        let slot = CacheSlot::new();
        slot.begin_download(name, AccessMode::Read);
        slot.complete_download(Bytes::from_static(b"contents"));
        slot
    }

    fn write_owned_slot(name: &str) -> CacheSlot {
        let slot = CacheSlot::new();
        slot.begin_download(name, AccessMode::Write);
        slot.complete_download(Bytes::from_static(b"contents"));
        slot
    }

    #[test]
    fn download_transitions_follow_the_table() {
        let slot = CacheSlot::new();
        slot.begin_download("a.txt", AccessMode::Read);
        assert_eq!(slot.state(), CacheState::ReadShared);

        // read-shared upgraded to write-owned
        slot.begin_download("a.txt", AccessMode::Write);
        assert_eq!(slot.state(), CacheState::WriteOwned);

        let slot = CacheSlot::new();
        slot.begin_download("a.txt", AccessMode::Write);
        assert_eq!(slot.state(), CacheState::WriteOwned);
    }

    #[test]
    fn failed_download_rolls_back_to_invalid() {
        let slot = read_shared_slot("a.txt");
        slot.begin_download("a.txt", AccessMode::Write);
        slot.fail_download();
        assert_eq!(slot.state(), CacheState::Invalid);
        assert!(!slot.hit("a.txt", AccessMode::Read));
    }

    #[test]
    fn hit_requires_matching_name() {
        let slot = read_shared_slot("a.txt");
        assert!(slot.hit("a.txt", AccessMode::Read));
        assert!(!slot.hit("b.txt", AccessMode::Read));
    }

    #[test]
    fn hit_mode_satisfaction() {
        let slot = read_shared_slot("a.txt");
        assert!(slot.hit("a.txt", AccessMode::Read));
        assert!(!slot.hit("a.txt", AccessMode::Write));

        let slot = write_owned_slot("a.txt");
        assert!(slot.hit("a.txt", AccessMode::Read));
        assert!(slot.hit("a.txt", AccessMode::Write));
    }

    #[test]
    fn hit_misses_while_writeback_pending() {
        let slot = write_owned_slot("a.txt");
        assert!(slot.writeback());
        assert_eq!(slot.state(), CacheState::PendingWriteback);
        assert!(!slot.hit("a.txt", AccessMode::Read));
        assert!(!slot.hit("a.txt", AccessMode::Write));
    }

    #[test]
    fn invalidate_only_from_read_shared() {
        let slot = read_shared_slot("a.txt");
        assert!(slot.invalidate());
        assert_eq!(slot.state(), CacheState::Invalid);

        // repeated invalidate is a false no-op
        assert!(!slot.invalidate());

        // a write-owned copy must never be silently dropped
        let slot = write_owned_slot("a.txt");
        let before = slot.bytes();
        assert!(!slot.invalidate());
        assert_eq!(slot.state(), CacheState::WriteOwned);
        assert_eq!(slot.bytes(), before);
    }

    #[test]
    fn writeback_only_from_write_owned() {
        let slot = write_owned_slot("a.txt");
        let before = slot.bytes();
        assert!(slot.writeback());
        assert_eq!(slot.bytes(), before);

        // second request finds the transition already made
        assert!(!slot.writeback());

        let slot = read_shared_slot("a.txt");
        assert!(!slot.writeback());
        assert_eq!(slot.state(), CacheState::ReadShared);
    }

    #[test]
    fn upload_payload_release_matches_state() {
        let slot = write_owned_slot("a.txt");
        let payload = slot.upload_payload().unwrap();
        assert!(payload.release);
        assert_eq!(payload.name, "a.txt");

        assert!(slot.writeback());
        let payload = slot.upload_payload().unwrap();
        assert!(!payload.release);

        let slot = read_shared_slot("a.txt");
        assert!(slot.upload_payload().is_none());
    }

    #[test]
    fn commit_upload_post_transitions() {
        let slot = write_owned_slot("a.txt");
        slot.commit_upload();
        assert_eq!(slot.state(), CacheState::Invalid);

        let slot = write_owned_slot("a.txt");
        assert!(slot.writeback());
        slot.commit_upload();
        assert_eq!(slot.state(), CacheState::ReadShared);
        assert!(slot.hit("a.txt", AccessMode::Read));
    }
}
