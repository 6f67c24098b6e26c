//! Answers CLI requests against a running host.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use protocol::{CreateOptions, Session};
use tokio_util::sync::CancellationToken;

use super::messages::{IpcRequest, IpcResponse, IpcSessionInfo};
use crate::orchestrator::Orchestrator;
use crate::session::SessionManager;

/// Turns a request into a response.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: IpcRequest) -> impl Future<Output = IpcResponse> + Send;
}

/// Handler backed by the host's [`Orchestrator`].
///
/// `Stop` cancels the shutdown token; the host's main loop does the actual
/// teardown.
pub struct HostHandler {
    orchestrator: Arc<Orchestrator>,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl HostHandler {
    pub fn new(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
            shutdown,
        }
    }

    fn status(&self) -> IpcResponse {
        IpcResponse::Status {
            running: !self.shutdown.is_cancelled(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            session_count: self.orchestrator.sessions().count(),
            tile_count: self
                .orchestrator
                .layout()
                .map(|tree| tree.tile_count())
                .unwrap_or(0),
        }
    }

    fn kill(&self, session_id: String) -> IpcResponse {
        let tiled = protocol::layout::contains(self.orchestrator.layout().as_ref(), &session_id);
        if !tiled && self.orchestrator.sessions().get(&session_id).is_none() {
            return IpcResponse::Error {
                message: format!("session not found: {session_id}"),
            };
        }
        self.orchestrator.close_terminal(&session_id);
        IpcResponse::SessionKilled { session_id }
    }

    /// Run a session-creating call off the async workers; spawning may wait
    /// on the first PATH lookup.
    async fn open<F>(&self, f: F) -> IpcResponse
    where
        F: FnOnce(&Orchestrator) -> Result<Session, String> + Send + 'static,
    {
        let orchestrator = Arc::clone(&self.orchestrator);
        match tokio::task::spawn_blocking(move || f(&orchestrator)).await {
            Ok(Ok(session)) => IpcResponse::Opened {
                session: IpcSessionInfo::from(&session),
            },
            Ok(Err(message)) => IpcResponse::Error { message },
            Err(e) => IpcResponse::Error {
                message: format!("session creation panicked: {e}"),
            },
        }
    }
}

impl RequestHandler for HostHandler {
    async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Status => self.status(),
            IpcRequest::Stop => {
                tracing::info!("Stop requested over IPC");
                self.shutdown.cancel();
                IpcResponse::Stopping
            }
            IpcRequest::ListSessions => IpcResponse::Sessions {
                sessions: self
                    .orchestrator
                    .sessions()
                    .get_all()
                    .iter()
                    .map(IpcSessionInfo::from)
                    .collect(),
            },
            IpcRequest::KillSession { session_id } => self.kill(session_id),
            IpcRequest::Layout => IpcResponse::Layout {
                layout: self.orchestrator.layout(),
            },
            IpcRequest::Launch { agent_id, cwd } => {
                self.open(move |orch| {
                    orch.launch(&agent_id, cwd.as_deref())
                        .map_err(|e| e.to_string())
                })
                .await
            }
            IpcRequest::OpenTerminal { shell, cwd } => {
                let mut options = CreateOptions::default();
                options.shell_type = shell;
                options.cwd = cwd;
                self.open(move |orch| Ok(orch.open_new_terminal(options)))
                    .await
            }
        }
    }
}
