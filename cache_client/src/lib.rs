//! Interactive client of the session-semantics file cache.
//!
//! Wires the [`session_cache`] core to a real server: an HTTP transport for
//! downloads and uploads, a callback endpoint the server revokes cached
//! copies through, an editor launcher for the actual file sessions, and the
//! interactive prompt loop that ties them together.

pub mod callback_server;
pub mod editor;
pub mod error;
pub mod remote_store;
pub mod session;

pub use callback_server::CallbackServer;
pub use editor::{Editor, EditorKind};
pub use error::{ClientError, Result};
pub use remote_store::HttpStore;
pub use session::Session;
