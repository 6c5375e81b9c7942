use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cache_types::{AccessMode, ClientId};
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::callback::ClientCallback;
use crate::error::{Result, ServerError};
use crate::store::FileStore;

pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Who currently holds a file, as the server sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldMode {
    Unheld,
    Shared,
    Exclusive,
}

struct RecordState {
    mode: HoldMode,
    /// Shared readers, or exactly the one exclusive owner. Each holder
    /// carries the callback handle used to reach it.
    holders: HashMap<ClientId, Arc<dyn ClientCallback>>,
    canonical: Bytes,
    loaded: bool,
}

/// Per-file record. `op_gate` serializes downloads of one file; `state` is
/// the short critical section shared with the upload path; `commits` wakes a
/// download blocked on a holder's writeback when the upload lands.
struct FileRecord {
    op_gate: Mutex<()>,
    state: Mutex<RecordState>,
    commits: watch::Sender<u64>,
}

impl FileRecord {
    fn new() -> Self {
        FileRecord {
            op_gate: Mutex::new(()),
            state: Mutex::new(RecordState {
                mode: HoldMode::Unheld,
                holders: HashMap::new(),
                canonical: Bytes::new(),
                loaded: false,
            }),
            commits: watch::Sender::new(0),
        }
    }
}

/// Arbitrates which client holds each file and in what mode.
///
/// Records are created on the first download of a filename and guarded
/// individually, so requests to different files never block each other.
/// Conflicting exclusive access is resolved by a blocking `writeback`
/// callback bounded by `callback_timeout`; shared readers displaced by a
/// write request are invalidated fire-and-forget.
pub struct OwnershipTable {
    records: RwLock<HashMap<String, Arc<FileRecord>>>,
    store: Arc<dyn FileStore>,
    callback_timeout: Duration,
}

impl OwnershipTable {
    pub fn new(store: Arc<dyn FileStore>, callback_timeout: Duration) -> Self {
        OwnershipTable {
            records: RwLock::new(HashMap::new()),
            store,
            callback_timeout,
        }
    }

    fn record(&self, filename: &str) -> Arc<FileRecord> {
        if let Some(record) = self.records.read().get(filename) {
            return record.clone();
        }
        self.records
            .write()
            .entry(filename.to_string())
            .or_insert_with(|| Arc::new(FileRecord::new()))
            .clone()
    }

    fn lookup(&self, filename: &str) -> Option<Arc<FileRecord>> {
        self.records.read().get(filename).cloned()
    }

    /// Grants `client` a copy of `filename`, first displacing whatever
    /// conflicting grants exist, and returns the canonical bytes.
    pub async fn download(
        &self,
        client: &ClientId,
        callback: Arc<dyn ClientCallback>,
        filename: &str,
        mode: AccessMode,
    ) -> Result<Bytes> {
        let record = self.record(filename);
        let _op = record.op_gate.lock().await;

        {
            let mut st = record.state.lock().await;
            if !st.loaded {
                st.canonical = self.store.load(filename).await?;
                st.loaded = true;
            }
            // A re-request by the current holder re-frames its grant rather
            // than conflicting with itself.
            if st.holders.remove(client).is_some() && st.holders.is_empty() {
                st.mode = HoldMode::Unheld;
            }
        }

        loop {
            let holder = {
                let st = record.state.lock().await;
                match st.mode {
                    HoldMode::Exclusive => st.holders.iter().next().map(|(id, cb)| (id.clone(), cb.clone())),
                    _ => None,
                }
            };
            let Some((holder_id, holder_cb)) = holder else {
                break;
            };
            self.revoke_exclusive(&record, filename, &holder_id, holder_cb).await;
        }

        let mut st = record.state.lock().await;
        match mode {
            AccessMode::Read => {
                st.holders.insert(client.clone(), callback);
                st.mode = HoldMode::Shared;
            }
            AccessMode::Write => {
                for (reader, cb) in st.holders.drain() {
                    // Fire-and-forget: a failed invalidate only delays that
                    // client's next hit; it is no longer a recognized holder.
                    let filename = filename.to_string();
                    tokio::spawn(async move {
                        match cb.invalidate().await {
                            Ok(true) => debug!("{reader} dropped its copy of '{filename}'"),
                            Ok(false) => warn!("{reader} refused to invalidate '{filename}'"),
                            Err(e) => warn!("invalidate callback to {reader} failed: {e}"),
                        }
                    });
                }
                st.holders.insert(client.clone(), callback);
                st.mode = HoldMode::Exclusive;
            }
        }
        info!("granted '{filename}' to {client} as {:?}", st.mode);
        Ok(st.canonical.clone())
    }

    /// Commits `bytes` as the canonical contents of `filename`. Accepted
    /// only from the current exclusive owner; everyone else gets the stale
    /// rejection so a revoked client can discard its local edits instead of
    /// clobbering newer canonical bytes.
    pub async fn upload(&self, client: &ClientId, filename: &str, bytes: Bytes, release: bool) -> Result<()> {
        let stale = || ServerError::StaleUpload {
            client: client.clone(),
            filename: filename.to_string(),
        };
        let record = self.lookup(filename).ok_or_else(&stale)?;

        let mut st = record.state.lock().await;
        let owns = st.mode == HoldMode::Exclusive && st.holders.contains_key(client);
        if !owns {
            warn!("rejecting upload of '{filename}' from {client}: not the current owner");
            return Err(stale());
        }

        // Persist before the grant is released: once this returns, no
        // download can observe pre-upload bytes.
        self.store.save(filename, &bytes).await?;
        st.canonical = bytes;
        if release {
            st.holders.clear();
            st.mode = HoldMode::Unheld;
        } else {
            st.mode = HoldMode::Shared;
        }
        info!("upload of '{filename}' from {client} committed (release={release})");
        drop(st);

        record.commits.send_modify(|n| *n += 1);
        Ok(())
    }

    /// Asks the exclusive holder to write back, then waits for its upload to
    /// commit, bounded overall by the callback timeout. A holder that is
    /// unreachable, refuses, or never commits is forcibly revoked: the
    /// request proceeds with the last committed bytes and the holder's later
    /// upload fails as stale. This trades the holder's unsynced edits for
    /// availability of the file.
    async fn revoke_exclusive(
        &self,
        record: &Arc<FileRecord>,
        filename: &str,
        holder: &ClientId,
        callback: Arc<dyn ClientCallback>,
    ) {
        info!("requesting writeback of '{filename}' from {holder}");
        let deadline = Instant::now() + self.callback_timeout;
        let mut commits = record.commits.subscribe();

        let scheduled = match tokio::time::timeout(self.callback_timeout, callback.writeback()).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                warn!("{holder} refused writeback of '{filename}'");
                false
            }
            Ok(Err(e)) => {
                warn!("writeback callback to {holder} failed: {e}");
                false
            }
            Err(_) => {
                warn!("writeback callback to {holder} timed out");
                false
            }
        };

        if scheduled {
            loop {
                {
                    let st = record.state.lock().await;
                    let still_held = st.mode == HoldMode::Exclusive && st.holders.contains_key(holder);
                    if !still_held {
                        return;
                    }
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                if tokio::time::timeout(remaining, commits.changed()).await.is_err() {
                    break;
                }
            }
        }

        let mut st = record.state.lock().await;
        if st.mode == HoldMode::Exclusive && st.holders.remove(holder).is_some() {
            st.mode = HoldMode::Unheld;
            warn!(
                "revoked unresponsive holder {holder} of '{filename}'; \
                 its pending edits will be rejected as stale"
            );
        }
    }

    /// Current hold mode of `filename`; `Unheld` when the server has never
    /// seen the name.
    pub async fn mode_of(&self, filename: &str) -> HoldMode {
        match self.lookup(filename) {
            Some(record) => record.state.lock().await.mode,
            None => HoldMode::Unheld,
        }
    }

    /// Clients currently holding `filename`, in no particular order.
    pub async fn holders_of(&self, filename: &str) -> Vec<ClientId> {
        match self.lookup(filename) {
            Some(record) => record.state.lock().await.holders.keys().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;

    const TEST_TIMEOUT: Duration = Duration::from_millis(200);

    /// Counts callbacks and answers with scripted booleans.
    #[derive(Default)]
    struct RecordingCallback {
        invalidates: AtomicUsize,
        writebacks: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ClientCallback for RecordingCallback {
        async fn invalidate(&self) -> Result<bool> {
            self.invalidates.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn writeback(&self) -> Result<bool> {
            self.writebacks.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    /// Accepts the writeback request and commits its upload inline, like a
    /// healthy client whose monitor reacts immediately.
    struct CooperativeCallback {
        table: Arc<OwnershipTable>,
        client: ClientId,
        filename: String,
        bytes: Bytes,
    }

    #[async_trait::async_trait]
    impl ClientCallback for CooperativeCallback {
        async fn invalidate(&self) -> Result<bool> {
            Ok(false)
        }

        async fn writeback(&self) -> Result<bool> {
            self.table
                .upload(&self.client, &self.filename, self.bytes.clone(), false)
                .await
                .expect("cooperative upload");
            Ok(true)
        }
    }

    /// Never answers the writeback request at all.
    struct HangingCallback;

    #[async_trait::async_trait]
    impl ClientCallback for HangingCallback {
        async fn invalidate(&self) -> Result<bool> {
            Ok(true)
        }

        async fn writeback(&self) -> Result<bool> {
            std::future::pending().await
        }
    }

    fn table() -> Arc<OwnershipTable> {
        Arc::new(OwnershipTable::new(Arc::new(MemoryStore::new()), TEST_TIMEOUT))
    }

    fn table_with(store: Arc<MemoryStore>) -> Arc<OwnershipTable> {
        Arc::new(OwnershipTable::new(store, TEST_TIMEOUT))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn first_download_serves_store_contents() {
        let store = Arc::new(MemoryStore::new());
        store.save("a.txt", &Bytes::from_static(b"seeded")).await.unwrap();
        let table = table_with(store);

        let bytes = table
            .download(&"A".into(), Arc::new(RecordingCallback::default()), "a.txt", AccessMode::Read)
            .await
            .unwrap();
        assert_eq!(bytes, Bytes::from_static(b"seeded"));
        assert_eq!(table.mode_of("a.txt").await, HoldMode::Shared);
        assert_eq!(table.holders_of("a.txt").await, vec![ClientId::from("A")]);
    }

    #[tokio::test]
    async fn unknown_filename_starts_empty() {
        let table = table();
        let bytes = table
            .download(&"A".into(), Arc::new(RecordingCallback::default()), "new.txt", AccessMode::Write)
            .await
            .unwrap();
        assert!(bytes.is_empty());
        assert_eq!(table.mode_of("new.txt").await, HoldMode::Exclusive);
    }

    #[tokio::test]
    async fn readers_share_without_callbacks() {
        let table = table();
        let cb_a = Arc::new(RecordingCallback::default());
        let cb_b = Arc::new(RecordingCallback::default());

        table.download(&"A".into(), cb_a.clone(), "a.txt", AccessMode::Read).await.unwrap();
        table.download(&"B".into(), cb_b.clone(), "a.txt", AccessMode::Read).await.unwrap();

        assert_eq!(table.mode_of("a.txt").await, HoldMode::Shared);
        assert_eq!(table.holders_of("a.txt").await.len(), 2);
        assert_eq!(cb_a.invalidates.load(Ordering::SeqCst), 0);
        assert_eq!(cb_a.writebacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn write_download_invalidates_shared_readers() {
        let table = table();
        let cb_a = Arc::new(RecordingCallback::default());

        table.download(&"A".into(), cb_a.clone(), "x.txt", AccessMode::Read).await.unwrap();
        table
            .download(&"C".into(), Arc::new(RecordingCallback::default()), "x.txt", AccessMode::Write)
            .await
            .unwrap();

        assert_eq!(table.mode_of("x.txt").await, HoldMode::Exclusive);
        assert_eq!(table.holders_of("x.txt").await, vec![ClientId::from("C")]);
        // the invalidate is fire-and-forget on a spawned task
        wait_until(|| cb_a.invalidates.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn exclusive_conflict_blocks_until_writeback_commits() {
        let table = table();
        let cb_a = Arc::new(RecordingCallback::default());
        table.download(&"A".into(), cb_a, "report.txt", AccessMode::Write).await.unwrap();

        let cooperative = Arc::new(CooperativeCallback {
            table: table.clone(),
            client: "A".into(),
            filename: "report.txt".to_string(),
            bytes: Bytes::from_static(b"final text"),
        });
        // replace A's callback handle with the cooperative one
        table.download(&"A".into(), cooperative, "report.txt", AccessMode::Write).await.unwrap();

        let bytes = table
            .download(&"B".into(), Arc::new(RecordingCallback::default()), "report.txt", AccessMode::Read)
            .await
            .unwrap();

        assert_eq!(bytes, Bytes::from_static(b"final text"));
        assert_eq!(table.mode_of("report.txt").await, HoldMode::Shared);
        let mut holders = table.holders_of("report.txt").await;
        holders.sort();
        assert_eq!(holders, vec![ClientId::from("A"), ClientId::from("B")]);
    }

    #[tokio::test]
    async fn unresponsive_holder_is_revoked_and_its_upload_goes_stale() {
        let table = table();
        table
            .download(&"A".into(), Arc::new(HangingCallback), "x.txt", AccessMode::Write)
            .await
            .unwrap();
        table.upload(&"A".into(), "x.txt", Bytes::from_static(b"v1"), false).await.unwrap();
        // A re-acquires exclusivity, then goes silent
        table
            .download(&"A".into(), Arc::new(HangingCallback), "x.txt", AccessMode::Write)
            .await
            .unwrap();

        let bytes = table
            .download(&"B".into(), Arc::new(RecordingCallback::default()), "x.txt", AccessMode::Write)
            .await
            .unwrap();
        // B proceeds with the last committed bytes
        assert_eq!(bytes, Bytes::from_static(b"v1"));
        assert_eq!(table.holders_of("x.txt").await, vec![ClientId::from("B")]);

        let err = table.upload(&"A".into(), "x.txt", Bytes::from_static(b"lost"), false).await.unwrap_err();
        assert!(matches!(err, ServerError::StaleUpload { .. }));
        // the stale edits never reached the canonical bytes
        let record_bytes = table
            .download(&"B".into(), Arc::new(RecordingCallback::default()), "x.txt", AccessMode::Write)
            .await
            .unwrap();
        assert_eq!(record_bytes, Bytes::from_static(b"v1"));
    }

    #[tokio::test]
    async fn refusing_holder_is_revoked() {
        let table = table();
        // RecordingCallback answers writeback with false
        let cb_a = Arc::new(RecordingCallback::default());
        table.download(&"A".into(), cb_a.clone(), "x.txt", AccessMode::Write).await.unwrap();

        table
            .download(&"B".into(), Arc::new(RecordingCallback::default()), "x.txt", AccessMode::Read)
            .await
            .unwrap();

        assert_eq!(cb_a.writebacks.load(Ordering::SeqCst), 1);
        assert_eq!(table.holders_of("x.txt").await, vec![ClientId::from("B")]);
    }

    #[tokio::test]
    async fn upload_requires_current_ownership() {
        let table = table();
        let err = table.upload(&"B".into(), "a.txt", Bytes::from_static(b"x"), false).await.unwrap_err();
        assert!(matches!(err, ServerError::StaleUpload { .. }));

        table
            .download(&"A".into(), Arc::new(RecordingCallback::default()), "a.txt", AccessMode::Read)
            .await
            .unwrap();
        // a shared reader is not an owner either
        let err = table.upload(&"A".into(), "a.txt", Bytes::from_static(b"x"), false).await.unwrap_err();
        assert!(matches!(err, ServerError::StaleUpload { .. }));
    }

    #[tokio::test]
    async fn upload_demotes_or_releases() {
        let store = Arc::new(MemoryStore::new());
        let table = table_with(store.clone());

        table
            .download(&"A".into(), Arc::new(RecordingCallback::default()), "a.txt", AccessMode::Write)
            .await
            .unwrap();
        table.upload(&"A".into(), "a.txt", Bytes::from_static(b"v1"), false).await.unwrap();
        assert_eq!(table.mode_of("a.txt").await, HoldMode::Shared);
        assert_eq!(table.holders_of("a.txt").await, vec![ClientId::from("A")]);
        // committed through to the backing store
        assert_eq!(store.load("a.txt").await.unwrap(), Bytes::from_static(b"v1"));

        table
            .download(&"A".into(), Arc::new(RecordingCallback::default()), "a.txt", AccessMode::Write)
            .await
            .unwrap();
        table.upload(&"A".into(), "a.txt", Bytes::from_static(b"v2"), true).await.unwrap();
        assert_eq!(table.mode_of("a.txt").await, HoldMode::Unheld);
        assert!(table.holders_of("a.txt").await.is_empty());
    }

    #[tokio::test]
    async fn holder_redownload_is_not_a_conflict() {
        let table = table();
        // A hanging callback would stall the download if A conflicted with
        // itself.
        table
            .download(&"A".into(), Arc::new(HangingCallback), "a.txt", AccessMode::Write)
            .await
            .unwrap();
        let started = std::time::Instant::now();
        table
            .download(&"A".into(), Arc::new(HangingCallback), "a.txt", AccessMode::Read)
            .await
            .unwrap();
        assert!(started.elapsed() < TEST_TIMEOUT);
        assert_eq!(table.mode_of("a.txt").await, HoldMode::Shared);
    }

    #[tokio::test]
    async fn operations_on_different_files_proceed_in_parallel() {
        let table = table();
        table
            .download(&"A".into(), Arc::new(HangingCallback), "x.txt", AccessMode::Write)
            .await
            .unwrap();

        // this download stalls on A's writeback until the timeout
        let blocked = {
            let table = table.clone();
            tokio::spawn(async move {
                table
                    .download(&"B".into(), Arc::new(RecordingCallback::default()), "x.txt", AccessMode::Write)
                    .await
            })
        };

        // a different file is granted immediately
        tokio::time::timeout(
            Duration::from_millis(100),
            table.download(&"C".into(), Arc::new(RecordingCallback::default()), "y.txt", AccessMode::Write),
        )
        .await
        .expect("download of an unrelated file must not block")
        .unwrap();

        blocked.await.unwrap().unwrap();
    }
}
