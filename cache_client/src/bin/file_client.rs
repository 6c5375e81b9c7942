//! Interactive client of the session-semantics file cache.
//!
//! Connects to a file server, runs a local callback endpoint the server can
//! revoke cached copies through, and loops reading a file name and access
//! mode from the terminal, opening each file in vim (or emacs with `-e`).
//! `quit` or `exit` uploads any write-owned copy and terminates.
//!
//! ```bash
//! file_client 127.0.0.1 8080
//! file_client fileserver.example.com 8080 -e
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use cache_client::{CallbackServer, Editor, EditorKind, HttpStore, Session};
use cache_types::ClientId;
use clap::Parser;
use session_cache::{CacheAgent, CacheSlot};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "file_client")]
#[command(version, about, long_about = None)]
struct Args {
    /// File server host name or address.
    server: String,

    /// File server port.
    port: u16,

    /// Edit with emacs instead of vim.
    #[arg(short = 'e', long)]
    emacs: bool,

    /// Interface the callback endpoint binds to and advertises to the
    /// server. Must be reachable from the server's machine.
    #[arg(long, default_value = "127.0.0.1")]
    callback_host: String,

    /// Port for the callback endpoint; 0 picks an ephemeral port.
    #[arg(long, default_value = "0")]
    callback_port: u16,

    /// Override the scratch file the editor opens.
    #[arg(long)]
    scratch_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "client".to_string());
    let client_id = ClientId::new(format!("{hostname}-{}", std::process::id()));

    let slot = CacheSlot::new();
    let callback = CallbackServer::start(slot.clone(), &args.callback_host, args.callback_port).await?;

    let endpoint = format!("http://{}:{}", args.server, args.port);
    let store = Arc::new(HttpStore::new(&endpoint, client_id.clone(), callback.advertised_addr().to_string()));
    store
        .health_check()
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach file server at {endpoint}: {e}"))?;
    let agent = CacheAgent::new(slot, store);

    let kind = if args.emacs { EditorKind::Emacs } else { EditorKind::Vim };
    let scratch = args.scratch_file.unwrap_or_else(Editor::default_scratch);
    let editor = Editor::new(kind, scratch);

    tracing::info!("client {client_id} ready; server {endpoint}, callbacks on {}", callback.advertised_addr());

    let session = Session::new(agent, editor);
    let result = session.run().await;

    callback.shutdown().await;
    result?;
    Ok(())
}
