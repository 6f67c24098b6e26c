//! # Tiledeck Protocol Library
//!
//! Plain data shared by the tiledeck host and anything that talks to it:
//! session snapshots, the layout tree, workspace records and session events.
//! Nothing in this crate performs I/O.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::layout::{add_tile, leaves, remove_tile, Direction};
//!
//! let tree = add_tile(None, "a", Direction::Row);
//! let tree = add_tile(Some(tree), "b", Direction::Column);
//! assert_eq!(leaves(Some(&tree)), vec!["a".to_string(), "b".to_string()]);
//!
//! let tree = remove_tile(Some(tree), "a");
//! assert_eq!(leaves(tree.as_ref()), vec!["b".to_string()]);
//! ```
//!
//! ## Modules
//!
//! - [`session`]: Session snapshots and create options
//! - [`layout`]: Binary-split layout tree and its pure operations
//! - [`workspace`]: Workspaces, agent presets, startup entries
//! - [`events`]: Output, exit and title notifications
//! - [`error`]: Error types

pub mod error;
pub mod events;
pub mod layout;
pub mod session;
pub mod workspace;

pub use error::{ProtocolError, Result};
pub use events::SessionEvent;
pub use layout::{Branch, Direction, LayoutNode};
pub use session::{
    CreateOptions, Session, SessionId, SessionStatus, ShellInfo, ShellType, TerminalSize,
    DEFAULT_THEME_ID, SPAWN_FAILURE_EXIT_CODE,
};
pub use workspace::{builtin_agents, AgentPreset, StartupEntry, Workspace, SHELL_ENTRY_ID};
