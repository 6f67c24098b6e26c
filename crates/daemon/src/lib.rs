//! # Tiledeck Host Library
//!
//! Terminal sessions for a tiled window: pseudo-terminal processes, the
//! registry that owns them, and the orchestration that keeps them in a
//! binary-split layout.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Host                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │  Orchestrator (layout tree, presets, workspace)    │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │  ┌──────────────────────┐  ┌──────────────────────────┐  │
//! │  │   SessionRegistry    │  │  Workspace / recent-dir  │  │
//! │  │  (PtySession map)    │  │        JSON stores       │  │
//! │  └──────────────────────┘  └──────────────────────────┘  │
//! │  ┌──────────────────────┐  ┌──────────────────────────┐  │
//! │  │    ShellResolver     │  │       PathResolver       │  │
//! │  └──────────────────────┘  └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, Host, StartOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let host = Host::new(&config)?;
//!
//!     host.start(&StartOptions {
//!         startup: vec!["shell".parse()?],
//!         restore: true,
//!     })
//!     .await?;
//!
//!     host.shutdown_token().cancelled().await;
//!     host.stop().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`shell`]: Shell selection and PATH enrichment
//! - [`session`]: PTY sessions and the registry
//! - [`orchestrator`]: Layout-aware session operations
//! - [`store`]: Workspace and recent-directory persistence
//! - [`host`]: Start/stop lifecycle
//! - `ipc`: Control socket used by the CLI (Unix only)

pub mod config;
pub mod host;
#[cfg(unix)]
pub mod ipc;
pub mod orchestrator;
pub mod session;
pub mod shell;
pub mod store;

pub use protocol;

pub use config::Config;
pub use host::{Host, HostState, StartOptions};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorEvent};
pub use session::{
    EventSink, PtySession, SessionError, SessionManager, SessionRegistry, SpawnContext,
};
pub use shell::{PathResolver, Platform, ShellResolver};
pub use store::{JsonRecentDirectories, JsonWorkspaceStore, RecentDirectories, WorkspaceStore};
