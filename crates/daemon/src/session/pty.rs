//! PTY session management.
//!
//! A [`PtySession`] owns one pseudo-terminal and the process running in it.
//! Output is read on a dedicated thread and pushed to a callback; the same
//! thread appends to the session's [`OutputBuffer`], scans for title changes
//! and finally reaps the child, so events for one session are produced in
//! exactly the order the process wrote them.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use protocol::{
    CreateOptions, Session, SessionEvent, SessionId, SessionStatus, ShellType, TerminalSize,
    SPAWN_FAILURE_EXIT_CODE,
};
use thiserror::Error;
use uuid::Uuid;

use super::buffer::OutputBuffer;
use super::lock;
use super::title::TitleScanner;
use crate::config::SessionConfig;
use crate::shell::{PathResolver, ShellRequest, ShellResolver};

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to spawn the PTY.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// The output sink can no longer be replaced.
    #[error("output sink cannot be replaced after the first session is created")]
    SinkLocked,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Callback receiving every event of one session.
pub type EventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Internal lifecycle.
///
/// `Starting` only exists while `create` runs. Transitions are forward only:
/// `Starting -> Running -> Exited`, or `Starting -> Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Running,
    Exited(u32),
    Error(String),
}

impl Lifecycle {
    /// Move to `next` if the transition is allowed.
    fn advance(&mut self, next: Lifecycle) -> bool {
        let allowed = matches!(
            (&*self, &next),
            (Lifecycle::Starting, Lifecycle::Running)
                | (Lifecycle::Starting, Lifecycle::Error(_))
                | (Lifecycle::Running, Lifecycle::Exited(_))
                | (Lifecycle::Running, Lifecycle::Error(_))
        );
        if allowed {
            *self = next;
        }
        allowed
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            Lifecycle::Starting | Lifecycle::Running => SessionStatus::Running,
            Lifecycle::Exited(_) => SessionStatus::Exited,
            Lifecycle::Error(_) => SessionStatus::Error,
        }
    }

    pub fn exit_code(&self) -> Option<u32> {
        match self {
            Lifecycle::Starting | Lifecycle::Running => None,
            Lifecycle::Exited(code) => Some(*code),
            Lifecycle::Error(_) => Some(SPAWN_FAILURE_EXIT_CODE),
        }
    }
}

/// Defaults applied to every new session.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub shell_type: Option<ShellType>,
    pub shell_path: Option<String>,
    pub theme_id: String,
    pub size: TerminalSize,
    pub scrollback_chunks: usize,
    pub kill_grace: Duration,
    pub detect_titles: bool,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default(), crate::shell::Platform::current())
    }
}

impl SessionDefaults {
    pub fn from_config(config: &SessionConfig, platform: crate::shell::Platform) -> Self {
        let (shell_type, shell_path) = config.default_shell_choice();
        Self {
            shell_type,
            shell_path: shell_path.map(str::to_string),
            theme_id: config.default_theme.clone(),
            size: config.size(),
            scrollback_chunks: config.scrollback_chunks,
            kill_grace: Duration::from_millis(config.kill_grace_ms),
            detect_titles: config.detect_titles.enabled(platform),
        }
    }
}

/// Everything needed to turn [`CreateOptions`] into a running process.
#[derive(Debug)]
pub struct SpawnContext {
    pub resolver: ShellResolver,
    pub paths: PathResolver,
    pub defaults: SessionDefaults,
}

impl SpawnContext {
    pub fn new(resolver: ShellResolver, paths: PathResolver, defaults: SessionDefaults) -> Self {
        Self {
            resolver,
            paths,
            defaults,
        }
    }

    /// Context for the current platform using real shells and PATH lookups.
    pub fn from_config(config: &SessionConfig) -> Self {
        let platform = crate::shell::Platform::current();
        Self {
            resolver: ShellResolver::new(
                platform,
                config.agent_shell,
                Arc::new(crate::shell::SystemProbe),
            ),
            paths: PathResolver::system(config.enrich_path),
            defaults: SessionDefaults::from_config(config, platform),
        }
    }
}

impl Default for SpawnContext {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Master side handles; dropped when the session is killed.
struct PtyIo {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
}

/// Mutable state shared with the reader thread.
struct State {
    lifecycle: Lifecycle,
    title: String,
    size: TerminalSize,
}

struct Shared {
    id: SessionId,
    state: Mutex<State>,
    buffer: Mutex<OutputBuffer>,
    /// Set by `kill`; output after this point is dropped.
    killed: AtomicBool,
    /// Set once the child has been reaped.
    reaped: AtomicBool,
    on_event: EventCallback,
}

/// A PTY session with a shell or agent process.
pub struct PtySession {
    shared: Arc<Shared>,
    shell_type: ShellType,
    cwd: String,
    command: Option<String>,
    args: Vec<String>,
    env: std::collections::BTreeMap<String, String>,
    theme_id: String,
    created_at: u64,
    pid: Option<u32>,
    io: Mutex<Option<PtyIo>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    kill_grace: Duration,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.shared.id)
            .field("shell_type", &self.shell_type)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

struct Spawned {
    io: PtyIo,
    reader: Box<dyn Read + Send>,
    child: Box<dyn Child + Send + Sync>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtySession {
    /// Create a session and start its process.
    ///
    /// This never fails. If the shell cannot be resolved or spawned the
    /// returned session is in the error state, carries the message, and an
    /// exit event with code 127 has been emitted.
    pub fn create(options: CreateOptions, ctx: &SpawnContext, on_event: EventCallback) -> Self {
        let id = Uuid::new_v4().to_string();
        let defaults = &ctx.defaults;

        let shell_type = options.shell_type.unwrap_or_else(|| {
            if options.command.is_some() {
                ShellType::Custom
            } else {
                defaults
                    .shell_type
                    .unwrap_or_else(|| ctx.resolver.default_shell_type())
            }
        });
        let cwd = options.cwd.clone().unwrap_or_else(home_dir);
        let size = options
            .size
            .filter(TerminalSize::is_valid)
            .unwrap_or(defaults.size);
        let title = options
            .title
            .clone()
            .unwrap_or_else(|| shell_type.display_name().to_string());

        let shared = Arc::new(Shared {
            id: id.clone(),
            state: Mutex::new(State {
                lifecycle: Lifecycle::Starting,
                title,
                size,
            }),
            buffer: Mutex::new(OutputBuffer::new(defaults.scrollback_chunks)),
            killed: AtomicBool::new(false),
            reaped: AtomicBool::new(false),
            on_event,
        });

        let mut session = PtySession {
            shared,
            shell_type,
            cwd,
            command: options.command.clone(),
            args: options.args.clone(),
            env: options.env.clone(),
            theme_id: options
                .theme_id
                .clone()
                .unwrap_or_else(|| defaults.theme_id.clone()),
            created_at: now_millis(),
            pid: None,
            io: Mutex::new(None),
            killer: Mutex::new(None),
            kill_grace: defaults.kill_grace,
        };

        let command_line = options.command_line();
        let shell_path = options
            .shell_path
            .as_deref()
            .or(if options.shell_type.is_none() {
                defaults.shell_path.as_deref()
            } else {
                None
            });
        let request = ShellRequest {
            shell_type: Some(shell_type),
            shell_path,
            command_line: command_line.as_deref(),
            cwd: &session.cwd,
        };
        let resolved = ctx.resolver.resolve(&request);
        let env = ctx
            .paths
            .enhanced_environment(std::env::vars(), &options.env);

        match spawn(&resolved.program, &resolved.args, &session.cwd, env, size) {
            Ok(spawned) => {
                session.pid = spawned.pid;
                *lock(&session.io) = Some(spawned.io);
                *lock(&session.killer) = Some(spawned.killer);
                lock(&session.shared.state).lifecycle.advance(Lifecycle::Running);

                tracing::info!(
                    session_id = %id,
                    program = %resolved.program,
                    pid = ?session.pid,
                    cwd = %session.cwd,
                    "Spawned PTY session"
                );

                let shared = Arc::clone(&session.shared);
                let detect_titles = defaults.detect_titles;
                let reader = spawned.reader;
                let child = spawned.child;
                let started = std::thread::Builder::new()
                    .name(format!("pty-reader-{}", &id[..8]))
                    .spawn(move || read_loop(shared, reader, child, detect_titles));
                if let Err(e) = started {
                    session.fail(format!("failed to start reader thread: {e}"));
                    session.kill();
                }
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %id,
                    program = %resolved.program,
                    error = %e,
                    "Failed to spawn session"
                );
                session.fail(format!("Failed to spawn \"{}\": {}", resolved.program, e));
            }
        }

        session
    }

    /// Record a failure and report it as an exit.
    fn fail(&self, message: String) {
        let advanced = lock(&self.shared.state)
            .lifecycle
            .advance(Lifecycle::Error(message));
        if advanced {
            (self.shared.on_event)(SessionEvent::Exit {
                id: self.shared.id.clone(),
                code: SPAWN_FAILURE_EXIT_CODE,
            });
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    /// Returns the process ID, if the process was started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn lifecycle(&self) -> Lifecycle {
        lock(&self.shared.state).lifecycle.clone()
    }

    /// Whether the process is alive and the session has not been killed.
    pub fn is_running(&self) -> bool {
        !self.shared.killed.load(Ordering::SeqCst)
            && lock(&self.shared.state).lifecycle == Lifecycle::Running
    }

    /// Current snapshot of the session.
    pub fn snapshot(&self) -> Session {
        let state = lock(&self.shared.state);
        let error = match &state.lifecycle {
            Lifecycle::Error(message) => Some(message.clone()),
            _ => None,
        };
        Session {
            id: self.shared.id.clone(),
            title: state.title.clone(),
            shell_type: self.shell_type,
            cwd: self.cwd.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            theme_id: self.theme_id.clone(),
            status: state.lifecycle.status(),
            exit_code: state.lifecycle.exit_code(),
            error,
            created_at: self.created_at,
            size: state.size,
            pid: self.pid,
        }
    }

    /// Retained output, oldest chunk first.
    pub fn scrollback(&self) -> Vec<Vec<u8>> {
        lock(&self.shared.buffer).snapshot()
    }

    /// Writes data to the PTY. A no-op unless the session is running.
    pub fn write(&self, data: &[u8]) {
        if !self.is_running() {
            tracing::debug!(session_id = %self.shared.id, "Write to inactive session ignored");
            return;
        }

        let mut io = lock(&self.io);
        if let Some(io) = io.as_mut() {
            let result = io.writer.write_all(data).and_then(|_| io.writer.flush());
            if let Err(e) = result {
                tracing::debug!(session_id = %self.shared.id, error = %e, "Failed to write to PTY");
            }
        }
    }

    /// Resizes the PTY.
    ///
    /// Ignored unless both dimensions are non-zero and the session is running.
    pub fn resize(&self, size: TerminalSize) {
        if !size.is_valid() || !self.is_running() {
            return;
        }

        let io = lock(&self.io);
        let Some(io) = io.as_ref() else {
            return;
        };
        let result = io.master.resize(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        });
        match result {
            Ok(()) => {
                lock(&self.shared.state).size = size;
                tracing::debug!(
                    session_id = %self.shared.id,
                    cols = size.cols,
                    rows = size.rows,
                    "Resized PTY"
                );
            }
            Err(e) => {
                tracing::debug!(session_id = %self.shared.id, error = %e, "Failed to resize PTY");
            }
        }
    }

    /// Terminates the process and releases the PTY. Idempotent.
    ///
    /// On Unix the whole process group is signalled (SIGHUP and SIGTERM),
    /// followed by SIGKILL if it is still alive after the grace period.
    pub fn kill(&self) {
        if self.shared.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        let killer = lock(&self.killer).take();
        let io = lock(&self.io).take();

        if let Some(pid) = self.pid {
            if !self.shared.reaped.load(Ordering::SeqCst) {
                #[cfg(unix)]
                signal_process_group(pid, self.kill_grace, Arc::clone(&self.shared));
                #[cfg(not(unix))]
                if let Some(mut killer) = killer {
                    if let Err(e) = killer.kill() {
                        tracing::debug!(session_id = %self.shared.id, error = %e, "Kill failed");
                    }
                }
            }
        }

        drop(io);
        #[cfg(unix)]
        drop(killer);

        tracing::info!(session_id = %self.shared.id, "Session killed");
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.kill();
    }
}

fn spawn(
    program: &str,
    args: &[String],
    cwd: &str,
    env: std::collections::BTreeMap<String, String>,
    size: TerminalSize,
) -> Result<Spawned, SessionError> {
    let pty_system = native_pty_system();

    let pair = pty_system
        .openpty(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| SessionError::SpawnFailed(format!("{e:#}")))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    cmd.cwd(cwd);
    cmd.env_clear();
    for (key, value) in env {
        cmd.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| SessionError::SpawnFailed(format!("{e:#}")))?;
    // The reader only sees EOF once every slave handle is closed.
    drop(pair.slave);

    let pid = child.process_id();
    let killer = child.clone_killer();

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| SessionError::SpawnFailed(format!("{e:#}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| SessionError::SpawnFailed(format!("{e:#}")))?;

    Ok(Spawned {
        io: PtyIo {
            master: pair.master,
            writer,
        },
        reader,
        child,
        killer,
        pid,
    })
}

fn read_loop(
    shared: Arc<Shared>,
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    detect_titles: bool,
) {
    let mut scanner = detect_titles.then(TitleScanner::new);
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if shared.killed.load(Ordering::SeqCst) {
                    continue;
                }
                let chunk = buf[..n].to_vec();
                let titles = scanner
                    .as_mut()
                    .map(|s| s.feed(&chunk))
                    .unwrap_or_default();

                lock(&shared.buffer).push(chunk.clone());
                (shared.on_event)(SessionEvent::Output {
                    id: shared.id.clone(),
                    data: chunk,
                });

                for title in titles {
                    lock(&shared.state).title = title.clone();
                    (shared.on_event)(SessionEvent::Title {
                        id: shared.id.clone(),
                        title,
                    });
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO once the slave side is gone.
                tracing::trace!(session_id = %shared.id, error = %e, "PTY read ended");
                break;
            }
        }
    }

    let code = match child.wait() {
        Ok(status) => status.exit_code(),
        Err(e) => {
            tracing::warn!(session_id = %shared.id, error = %e, "Failed to reap child");
            1
        }
    };
    shared.reaped.store(true, Ordering::SeqCst);

    let advanced = lock(&shared.state).lifecycle.advance(Lifecycle::Exited(code));
    if advanced {
        tracing::info!(session_id = %shared.id, exit_code = code, "Session exited");
        (shared.on_event)(SessionEvent::Exit {
            id: shared.id.clone(),
            code,
        });
    }
}

#[cfg(unix)]
fn signal_process_group(pid: u32, grace: Duration, shared: Arc<Shared>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let pgid = Pid::from_raw(raw);

    for signal in [Signal::SIGHUP, Signal::SIGTERM] {
        if let Err(e) = killpg(pgid, signal) {
            tracing::debug!(session_id = %shared.id, pid, error = %e, ?signal, "killpg failed");
            return;
        }
    }

    let escalate = std::thread::Builder::new()
        .name("pty-reaper".to_string())
        .spawn(move || {
            let step = Duration::from_millis(25);
            let mut waited = Duration::ZERO;
            while waited < grace {
                if shared.reaped.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(step);
                waited += step;
            }
            if !shared.reaped.load(Ordering::SeqCst) {
                tracing::debug!(session_id = %shared.id, pid, "Escalating to SIGKILL");
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        });
    if let Err(e) = escalate {
        tracing::warn!(error = %e, "Failed to start reaper thread");
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

fn home_dir() -> String {
    dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string())
}

/// Current time in milliseconds since Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
