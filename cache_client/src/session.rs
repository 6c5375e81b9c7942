use std::io::Write;

use cache_types::AccessMode;
use session_cache::{CacheAgent, WritebackMonitor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::editor::Editor;
use crate::error::Result;

/// The interactive foreground loop.
///
/// While the user sits at the prompt, a [`WritebackMonitor`] watches the
/// cache for server-requested writebacks; it is stopped (joined, not just
/// signalled) before the loop touches the cache, so the two never race on
/// the slot.
pub struct Session {
    agent: CacheAgent,
    editor: Editor,
}

impl Session {
    pub fn new(agent: CacheAgent, editor: Editor) -> Self {
        Session { agent, editor }
    }

    /// Prompts for file names and modes until `quit`/`exit` or end of
    /// input, then flushes any write-owned copy back to the server.
    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let monitor = WritebackMonitor::spawn(self.agent.clone());

            println!("FileClient: Next file to open:");
            print!("\tFile name: ");
            std::io::stdout().flush()?;
            let Some(filename) = lines.next_line().await? else {
                monitor.stop().await;
                break;
            };
            let filename = filename.trim().to_string();

            if filename == "quit" || filename == "exit" {
                monitor.stop().await;
                break;
            }
            if filename.is_empty() {
                eprintln!("Do it again");
                monitor.stop().await;
                continue;
            }

            print!("\tHow(r/w): ");
            std::io::stdout().flush()?;
            let Some(mode_line) = lines.next_line().await? else {
                monitor.stop().await;
                break;
            };
            let Ok(mode) = mode_line.parse::<AccessMode>() else {
                eprintln!("Do it again");
                monitor.stop().await;
                continue;
            };

            // foreground takes over the cache now
            monitor.stop().await;

            if let Err(e) = self.open(&filename, mode).await {
                eprintln!("file operation failed: {e}");
            }
        }

        self.flush_on_exit().await;
        Ok(())
    }

    /// One file operation: resolve any pending writeback, check the cache,
    /// flush and replace on a miss, then hand the bytes to the editor.
    async fn open(&self, filename: &str, mode: AccessMode) -> Result<()> {
        if self.agent.slot().is_pending_writeback() {
            self.agent.upload().await?;
        }

        if !self.agent.hit(filename, mode) {
            if self.agent.slot().is_write_owned() {
                // replacement: the old file's edits go up before the new
                // download
                self.agent.upload().await?;
            }
            self.agent.download(filename, mode).await?;
        }

        if let Some(edited) = self.editor.edit(&self.agent.bytes(), mode).await? {
            self.agent.slot().set_bytes(edited);
        }
        Ok(())
    }

    async fn flush_on_exit(&self) {
        if self.agent.slot().is_write_owned() || self.agent.slot().is_pending_writeback() {
            if let Err(e) = self.agent.upload().await {
                warn!("final upload failed, local edits were not committed: {e}");
                eprintln!("final upload failed: {e}");
            }
        }
    }
}
