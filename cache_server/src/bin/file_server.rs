//! The file server of the session-semantics cache.
//!
//! Serves downloads and uploads over HTTP and calls back into clients to
//! invalidate or revoke their cached copies when conflicting requests
//! arrive. Canonical bytes are kept under the data directory, one file per
//! served name.
//!
//! ```bash
//! # defaults: port 8080, data in ./file_cache_data
//! file_server
//!
//! file_server --data-directory /srv/files --host 0.0.0.0 --port 9000
//! ```
//!
//! `RUST_LOG` controls logging verbosity (e.g. `RUST_LOG=debug`).

use std::path::PathBuf;
use std::time::Duration;

use cache_server::{CoherenceServer, ServerConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "file_server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory where the canonical file bytes are stored. Created if it
    /// doesn't exist. Ignored when --in-memory is set.
    #[arg(short, long, default_value = "./file_cache_data")]
    data_directory: PathBuf,

    /// Network interface to bind to. "127.0.0.1" for local-only access,
    /// "0.0.0.0" to accept connections from any interface.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port for the HTTP server.
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Keep file bytes in memory instead of on disk. Everything is lost
    /// when the server stops; useful for testing.
    #[arg(long, default_value = "false")]
    in_memory: bool,

    /// How many seconds a download may wait for an exclusive holder to
    /// write back before that holder is revoked. A revoked holder's edits
    /// are rejected as stale: availability is chosen over durability for
    /// unreachable clients.
    #[arg(long, default_value = "10")]
    callback_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let config = ServerConfig {
        data_directory: args.data_directory,
        host: args.host,
        port: args.port,
        in_memory: args.in_memory,
        callback_timeout: Duration::from_secs(args.callback_timeout_secs),
    };

    tracing::info!("starting file server with config: {config:?}");
    if config.in_memory {
        tracing::info!("storage mode: in-memory");
    } else {
        tracing::info!("storage mode: disk-backed at {:?}", config.data_directory);
    }

    let server = CoherenceServer::new(config)?;
    server.run().await?;

    Ok(())
}
