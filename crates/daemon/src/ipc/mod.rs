//! Local control channel between the `tiledeck` CLI and a running host.
//!
//! Messages are newline-delimited JSON over a Unix Domain Socket: each
//! request and each response is one JSON value followed by `\n`.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/tiledeck/host.sock`
//! - Fallback: `/tmp/tiledeck-$UID/host.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{get_socket_path, IpcClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     if client.ping().await? {
//!         println!("Host is running");
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod handler;
mod messages;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use handler::{HostHandler, RequestHandler};
pub use messages::{IpcRequest, IpcResponse, IpcSessionInfo};
pub use pidfile::{get_host_pid, get_pid_file_path, is_host_running, PidFile};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Path of the host's control socket.
///
/// `$XDG_RUNTIME_DIR` is preferred since it is private to the user and
/// cleared on logout.
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("tiledeck").join("host.sock");
    }

    let uid = nix::unistd::getuid();
    PathBuf::from(format!("/tmp/tiledeck-{uid}")).join("host.sock")
}

/// Unix Domain Sockets are unavailable; the path is never bound.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    std::env::temp_dir().join("tiledeck").join("host.sock")
}
