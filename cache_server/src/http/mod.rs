//! HTTP surface of the coherence server: an axum router bridging the RPC
//! endpoints the clients call to the [`OwnershipTable`](crate::OwnershipTable).

mod handlers;
mod server;

pub use server::{CoherenceServer, ServerConfig};
