//! Server side of the session-semantics file cache.
//!
//! The [`OwnershipTable`] arbitrates which client may hold each file and in
//! what mode, pushing `invalidate`/`writeback` callbacks to clients exactly
//! when a conflicting request arrives. Canonical bytes live behind the
//! [`FileStore`] trait. The table is reachable over HTTP through
//! [`CoherenceServer`], or in-process through [`DirectStore`].

pub mod callback;
pub mod direct;
pub mod error;
pub mod http;
pub mod ownership;
pub mod store;

pub use callback::{ClientCallback, HttpCallback, SlotCallback};
pub use direct::DirectStore;
pub use error::{Result, ServerError};
pub use http::{CoherenceServer, ServerConfig};
pub use ownership::{HoldMode, OwnershipTable, DEFAULT_CALLBACK_TIMEOUT};
pub use store::{DiskStore, FileStore, MemoryStore};
