use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::agent::CacheAgent;
use crate::error::CacheError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Background task that pushes a revoked write copy back to the server.
///
/// The session loop spawns one of these whenever the foreground is idle at
/// the prompt, and must stop it (awaiting the join) before touching the
/// cache again. Stopping is cooperative: an upload already in flight runs to
/// completion before the task observes the cancellation and exits.
pub struct WritebackMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl WritebackMonitor {
    pub fn spawn(agent: CacheAgent) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(agent, cancel.clone()));
        WritebackMonitor { cancel, handle }
    }

    /// Signals the task to exit and waits for it to do so.
    pub async fn stop(self) {
        self.cancel.cancel();
        if self.handle.await.is_err() {
            warn!("writeback monitor task panicked");
        }
    }
}

async fn monitor_loop(agent: CacheAgent, cancel: CancellationToken) {
    loop {
        if agent.slot().is_pending_writeback() {
            match agent.upload().await {
                Ok(()) => {}
                // the slot was already dropped; nothing left to push
                Err(CacheError::StaleUpload) => {}
                Err(e) => warn!("background writeback failed, will retry: {e}"),
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use cache_types::AccessMode;

    use super::*;
    use crate::entry::{CacheSlot, CacheState};
    use crate::test_store::FakeStore;

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn write_owned_agent(store: Arc<FakeStore>) -> CacheAgent {
        let agent = CacheAgent::new(CacheSlot::new(), store);
        agent.download("a.txt", AccessMode::Write).await.unwrap();
        agent.slot().set_bytes(Bytes::from_static(b"edited"));
        agent
    }

    #[tokio::test]
    async fn monitor_uploads_pending_writeback() {
        let store = Arc::new(FakeStore::with_file("a.txt", b"old"));
        let agent = write_owned_agent(store.clone()).await;

        let monitor = WritebackMonitor::spawn(agent.clone());
        assert!(agent.slot().writeback());

        wait_until(|| agent.slot().state() == CacheState::ReadShared).await;
        monitor.stop().await;

        let (bytes, release) = store.last_upload("a.txt").unwrap();
        assert_eq!(bytes, Bytes::from_static(b"edited"));
        assert!(!release);
    }

    #[tokio::test]
    async fn monitor_retries_failed_uploads() {
        let store = Arc::new(FakeStore::with_file("a.txt", b"old"));
        let agent = write_owned_agent(store.clone()).await;
        store.fail_uploads(2);

        let monitor = WritebackMonitor::spawn(agent.clone());
        assert!(agent.slot().writeback());

        wait_until(|| agent.slot().state() == CacheState::ReadShared).await;
        monitor.stop().await;
        assert!(store.last_upload("a.txt").is_some());
    }

    #[tokio::test]
    async fn stopped_monitor_leaves_idle_slot_alone() {
        let store = Arc::new(FakeStore::with_file("a.txt", b"old"));
        let agent = write_owned_agent(store.clone()).await;

        let monitor = WritebackMonitor::spawn(agent.clone());
        monitor.stop().await;

        // still write-owned: no writeback was requested, so nothing uploaded
        assert_eq!(agent.slot().state(), CacheState::WriteOwned);
        assert!(store.last_upload("a.txt").is_none());
    }

    #[tokio::test]
    async fn stop_joins_after_in_flight_upload_completes() {
        let store = Arc::new(FakeStore::with_file("a.txt", b"old"));
        let agent = write_owned_agent(store.clone()).await;

        let monitor = WritebackMonitor::spawn(agent.clone());
        assert!(agent.slot().writeback());
        wait_until(|| agent.slot().state() == CacheState::ReadShared).await;

        // after stop returns, the task has fully exited; the slot can be
        // replaced without racing a half-done upload
        monitor.stop().await;
        agent.download("b.txt", AccessMode::Read).await.unwrap();
        assert!(agent.hit("b.txt", AccessMode::Read));
    }
}
