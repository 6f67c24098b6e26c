//! Host lifecycle: wiring the registry, orchestrator and stores together and
//! running the start/stop sequence.

use std::sync::Arc;

use anyhow::{Context, Result};
use protocol::StartupEntry;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::session::{EventSink, LogSink, SessionManager, SessionRegistry};

/// Host lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Initial state, not started.
    Stopped,
    /// Restoring the workspace and opening startup tiles.
    Starting,
    /// Running and accepting control requests.
    Running,
    /// Saving the workspace and closing sessions.
    ShuttingDown,
}

/// What to open when the host starts.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Tiles to open, in order.
    pub startup: Vec<StartupEntry>,
    /// Restore the saved workspace before opening startup tiles.
    pub restore: bool,
}

/// The running host.
pub struct Host {
    registry: Arc<SessionRegistry>,
    orchestrator: Arc<Orchestrator>,
    state: RwLock<HostState>,
    /// Held for the whole of `start` and `stop` so they never interleave.
    lifecycle: Mutex<()>,
    shutdown_token: CancellationToken,
}

impl Host {
    /// Creates a host whose session events are logged.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_sink(config, Arc::new(LogSink))
    }

    /// Creates a host delivering session events to `sink`.
    pub fn with_sink(config: &Config, sink: Arc<dyn EventSink>) -> Result<Self> {
        let registry = Arc::new(SessionRegistry::from_config(&config.session));
        registry
            .set_output_sink(sink)
            .context("Failed to register session event sink")?;

        let sessions: Arc<dyn SessionManager> = registry.clone();
        let orchestrator = Arc::new(Orchestrator::from_config(config, sessions)?);

        Ok(Self {
            registry,
            orchestrator,
            state: RwLock::new(HostState::Stopped),
            lifecycle: Mutex::new(()),
            shutdown_token: CancellationToken::new(),
        })
    }

    pub async fn state(&self) -> HostState {
        *self.state.read().await
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Token cancelled when the host should shut down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Restores the workspace if asked to, then opens the startup tiles.
    ///
    /// A host that has been stopped cannot be started again.
    pub async fn start(&self, options: &StartOptions) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.write().await;
            if *state != HostState::Stopped {
                anyhow::bail!("Host is already running");
            }
            if self.shutdown_token.is_cancelled() {
                anyhow::bail!("Host has been shut down");
            }
            *state = HostState::Starting;
        }
        info!("Starting tiledeck host...");

        let orchestrator = Arc::clone(&self.orchestrator);
        let options = options.clone();
        let token = self.shutdown_token.clone();
        tokio::task::spawn_blocking(move || {
            if options.restore {
                match orchestrator.restore_saved() {
                    Ok(restored) => info!(count = restored.len(), "Restored sessions"),
                    Err(e) => warn!("Failed to restore workspace: {:#}", e),
                }
            }
            for entry in &options.startup {
                if token.is_cancelled() {
                    info!("Shutdown requested, skipping remaining startup entries");
                    break;
                }
                orchestrator.apply_startup(std::slice::from_ref(entry));
            }
        })
        .await
        .context("Startup task failed")?;

        *self.state.write().await = HostState::Running;
        info!(
            sessions = self.registry.count(),
            "Tiledeck host started"
        );
        Ok(())
    }

    /// Saves the workspace and closes every session. Idempotent.
    ///
    /// Called while the host is starting, it cuts the startup list short and
    /// waits for `start` to return before tearing down.
    pub async fn stop(&self) -> Result<()> {
        if *self.state.read().await == HostState::Starting {
            self.shutdown_token.cancel();
        }
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.write().await;
            match *state {
                HostState::Stopped => return Ok(()),
                HostState::ShuttingDown => anyhow::bail!("Host is already shutting down"),
                _ => *state = HostState::ShuttingDown,
            }
        }
        info!("Stopping tiledeck host...");
        self.shutdown_token.cancel();

        if let Err(e) = self.orchestrator.save_workspace() {
            warn!("Error saving workspace: {:#}", e);
        }
        self.orchestrator.close_all();
        self.registry.kill_all();

        *self.state.write().await = HostState::Stopped;
        info!("Tiledeck host stopped");
        Ok(())
    }
}
