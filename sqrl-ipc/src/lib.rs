//! Line-delimited JSON-RPC 2.0 dispatch layer over a Unix domain socket
//! (§4.G, §4.H): request handlers, the error-code taxonomy, and the
//! accept-loop server itself.

pub mod error;
pub mod handlers;
pub mod jsonrpc;
pub mod server;

pub use error::{Error, Result};
pub use handlers::AppState;
pub use server::{IpcServer, ServerConfig};
