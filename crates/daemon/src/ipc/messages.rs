//! IPC message types for CLI-host communication.
//!
//! This module defines the request and response types exchanged with the
//! running host over its Unix Domain Socket.

use protocol::{LayoutNode, Session, SessionStatus, ShellType};
use serde::{Deserialize, Serialize};

/// Requests that can be sent from the CLI to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the host is alive.
    Ping,
    /// Get the current status of the host.
    Status,
    /// Request the host to stop gracefully.
    Stop,
    /// List all sessions.
    ListSessions,
    /// Close a session by ID.
    KillSession {
        /// The unique identifier of the session to close.
        session_id: String,
    },
    /// Get the current layout tree.
    Layout,
    /// Launch an agent preset in a new tile.
    Launch {
        agent_id: String,
        cwd: Option<String>,
    },
    /// Open a plain shell in a new tile.
    OpenTerminal {
        shell: Option<ShellType>,
        cwd: Option<String>,
    },
}

/// Responses sent from the host to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current host status.
    Status {
        /// Whether the host is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Number of sessions, including ones whose process exited.
        session_count: usize,
        /// Number of tiles in the layout.
        tile_count: usize,
    },
    /// Acknowledgment that the host is stopping.
    Stopping,
    /// List of sessions.
    Sessions {
        /// Information about each session.
        sessions: Vec<IpcSessionInfo>,
    },
    /// Confirmation that a session was closed.
    SessionKilled {
        /// The ID of the closed session.
        session_id: String,
    },
    /// The current layout.
    Layout { layout: Option<LayoutNode> },
    /// A session was opened.
    Opened { session: IpcSessionInfo },
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Summary of a session for IPC communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcSessionInfo {
    /// Unique session identifier.
    pub id: String,
    pub title: String,
    pub status: SessionStatus,
    pub exit_code: Option<u32>,
    pub cwd: String,
    /// Unix timestamp in milliseconds when the session was created.
    pub created_at: u64,
    pub pid: Option<u32>,
    pub error: Option<String>,
}

impl From<&Session> for IpcSessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            status: session.status,
            exit_code: session.exit_code,
            cwd: session.cwd.clone(),
            created_at: session.created_at,
            pid: session.pid,
            error: session.error.clone(),
        }
    }
}
