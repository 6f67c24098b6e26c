//! Tiledeck
//!
//! Host process and control CLI for a tiled terminal window.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::shell::{Platform, ShellResolver, SystemProbe};
use protocol::{LayoutNode, ShellType, StartupEntry};

/// Tiledeck - terminal sessions in a tiled layout.
#[derive(Parser, Debug)]
#[command(name = "tiledeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the tiledeck host
    Start {
        /// Open a tile at startup; `shell` opens a plain terminal.
        /// May be given several times.
        #[arg(long = "agent", short = 'a', value_name = "ID[:CWD]")]
        agents: Vec<StartupEntry>,

        /// Restore the last saved workspace
        #[arg(long)]
        restore: bool,
    },

    /// Stop the running host
    Stop {
        /// Force immediate termination (SIGKILL)
        #[arg(long, short)]
        force: bool,

        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show host status
    Status,

    /// Manage sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),

    /// Show the current layout
    Layout {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Launch an agent preset in a new tile
    Launch {
        /// Agent preset id
        agent: String,

        /// Working directory (defaults to the preset's)
        #[arg(long)]
        cwd: Option<String>,
    },

    /// Open a plain shell in a new tile
    Open {
        /// Shell to run (defaults to the configured shell)
        #[arg(long, short)]
        shell: Option<ShellType>,

        /// Working directory
        #[arg(long)]
        cwd: Option<String>,
    },

    /// List configured agent presets
    Agents,

    /// List shells known on this platform
    Shells,
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List all sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Close a session and its tile
    Kill {
        /// Session ID to close
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // The host logs to a daily file as well; CLI commands only to stderr.
    let _log_guard = if matches!(cli.command, Commands::Start { .. }) {
        Some(init_host_logging(&config, filter)?)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        None
    };

    match cli.command {
        Commands::Agents => {
            print_agents(&config);
            Ok(())
        }
        Commands::Shells => {
            let resolver = ShellResolver::new(
                Platform::current(),
                config.session.agent_shell,
                Arc::new(SystemProbe),
            );
            for shell in resolver.available_shells() {
                println!(
                    "  {:<12} {:<12} {}{}",
                    shell.id.as_str(),
                    shell.name,
                    shell.path,
                    if shell.available { "" } else { "  (not found)" }
                );
            }
            Ok(())
        }
        command => run_command(config, command).await,
    }
}

/// Set up stderr plus daily-rotated file logging for the host process.
fn init_host_logging(
    config: &Config,
    filter: tracing_subscriber::EnvFilter,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tiledeck.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();
    Ok(guard)
}

fn print_agents(config: &Config) {
    if config.agents.is_empty() {
        println!("No agent presets configured.");
        return;
    }
    let id_width = config
        .agents
        .iter()
        .map(|a| a.id.len())
        .max()
        .unwrap_or(2)
        .max(2);
    for agent in &config.agents {
        println!(
            "  {:<id_width$}  {:<16}  {}",
            agent.id,
            agent.name,
            agent.command_line(),
            id_width = id_width
        );
    }
}

#[cfg(not(unix))]
async fn run_command(_config: Config, _command: Commands) -> anyhow::Result<()> {
    anyhow::bail!("the tiledeck host and its control socket require a Unix platform")
}

#[cfg(unix)]
async fn run_command(config: Config, command: Commands) -> anyhow::Result<()> {
    use daemon::ipc::{get_host_pid, is_host_running, IpcResponse};
    use daemon::StartOptions;

    match command {
        Commands::Start { agents, restore } => {
            if is_host_running() {
                let pid = get_host_pid().unwrap_or(0);
                eprintln!("Error: Host already running (PID: {})", pid);
                eprintln!();
                eprintln!("To stop the existing host, run:");
                eprintln!("  tiledeck stop");
                std::process::exit(1);
            }
            let options = StartOptions {
                startup: agents,
                restore,
            };
            remote::run_host(config, options).await
        }
        Commands::Stop { force, timeout } => {
            tracing::info!("Stopping host (force: {})", force);
            if force {
                remote::force_stop_host()?;
                println!("Host forcefully terminated");
            } else {
                if let Err(e) = remote::graceful_stop_host(timeout).await {
                    eprintln!("Failed to stop host: {}", e);
                    eprintln!("Try: tiledeck stop --force");
                    std::process::exit(1);
                }
                println!("Host stopped successfully");
            }
            Ok(())
        }
        Commands::Status => match remote::status().await {
            Ok(IpcResponse::Status {
                running,
                uptime_secs,
                session_count,
                tile_count,
            }) => {
                println!(
                    "Host Status: {}",
                    if running { "running" } else { "stopping" }
                );
                println!("  Uptime:   {}", format_duration(uptime_secs));
                println!("  Sessions: {}", session_count);
                println!("  Tiles:    {}", tile_count);
                Ok(())
            }
            Ok(other) => remote::unexpected(other),
            Err(e) => {
                eprintln!("Host is not running: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Sessions(SessionsCommands::List { json }) => {
            match remote::check(remote::connect().await?.list_sessions().await)? {
                IpcResponse::Sessions { sessions } => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&sessions)?);
                    } else {
                        print_sessions_table(&sessions);
                    }
                    Ok(())
                }
                other => remote::unexpected(other),
            }
        }
        Commands::Sessions(SessionsCommands::Kill { session_id }) => {
            let mut client = remote::connect().await?;
            match remote::check(client.kill_session(session_id).await)? {
                IpcResponse::SessionKilled { session_id } => {
                    println!("Session {} closed", session_id);
                    Ok(())
                }
                other => remote::unexpected(other),
            }
        }
        Commands::Layout { json } => match remote::check(remote::connect().await?.layout().await)? {
            IpcResponse::Layout { layout } => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&layout)?);
                } else {
                    match layout {
                        Some(tree) => print!("{}", render_layout(&tree)),
                        None => println!("No tiles open."),
                    }
                }
                Ok(())
            }
            other => remote::unexpected(other),
        },
        Commands::Launch { agent, cwd } => {
            let response = remote::check(remote::connect().await?.launch(agent, cwd).await)?;
            print_opened(response)
        }
        Commands::Open { shell, cwd } => {
            let response = remote::check(remote::connect().await?.open_terminal(shell, cwd).await)?;
            print_opened(response)
        }
        Commands::Agents | Commands::Shells => Ok(()),
    }
}

#[cfg(unix)]
fn print_opened(response: daemon::ipc::IpcResponse) -> anyhow::Result<()> {
    use daemon::ipc::IpcResponse;

    match response {
        IpcResponse::Opened { session } => {
            println!("Opened {} ({}) in {}", session.id, session.title, session.cwd);
            if let Some(error) = session.error {
                eprintln!("  failed to start: {}", error);
            }
            Ok(())
        }
        other => remote::unexpected(other),
    }
}

/// Talking to a running host over its control socket.
#[cfg(unix)]
mod remote {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use daemon::config::Config;
    use daemon::ipc::{
        get_pid_file_path, get_socket_path, HostHandler, IpcClient, IpcError, IpcResponse,
        IpcServer, PidFile,
    };
    use daemon::orchestrator::OrchestratorEvent;
    use daemon::{Host, StartOptions};

    /// Connect to the running host.
    pub async fn connect() -> anyhow::Result<IpcClient> {
        IpcClient::connect_with_timeout(&get_socket_path(), Duration::from_secs(5))
            .await
            .map_err(|_| anyhow::anyhow!("Host is not running (cannot connect to socket)"))
    }

    /// Turn a transport failure or a host-side error into `Err`.
    pub fn check(response: Result<IpcResponse, IpcError>) -> anyhow::Result<IpcResponse> {
        match response.context("Request to host failed")? {
            IpcResponse::Error { message } => anyhow::bail!("{}", message),
            response => Ok(response),
        }
    }

    pub async fn status() -> anyhow::Result<IpcResponse> {
        let mut client = connect().await?;
        check(client.status().await)
    }

    pub fn unexpected(response: IpcResponse) -> anyhow::Result<()> {
        anyhow::bail!("Unexpected response from host: {:?}", response)
    }

    /// Run the host until a signal or a `stop` request arrives.
    pub async fn run_host(config: Config, options: StartOptions) -> anyhow::Result<()> {
        let _pid_file = PidFile::create(&get_pid_file_path())?;

        let host = Host::new(&config)?;
        let socket_path = get_socket_path();
        let server = IpcServer::bind(&socket_path)
            .await
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
        tracing::info!(socket = %socket_path.display(), "Control socket listening");

        let mut events = host.orchestrator().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    OrchestratorEvent::TerminalOpened { session_id } => {
                        tracing::info!(session_id = %session_id, "Terminal opened");
                    }
                    OrchestratorEvent::TerminalClosed { session_id } => {
                        tracing::info!(session_id = %session_id, "Terminal closed");
                    }
                    OrchestratorEvent::LayoutChanged(layout) => {
                        let tiles = layout.map(|tree| tree.tile_count()).unwrap_or(0);
                        tracing::debug!(tiles, "Layout changed");
                    }
                }
            }
        });

        host.start(&options).await?;

        let token = host.shutdown_token();
        let handler = Arc::new(HostHandler::new(Arc::clone(host.orchestrator()), token.clone()));
        let server_task = tokio::spawn(server.serve(handler, token.clone()));

        tokio::select! {
            result = wait_for_shutdown_signal() => {
                result?;
                tracing::info!("Received shutdown signal");
            }
            _ = token.cancelled() => {}
        }

        host.stop().await?;
        let _ = server_task.await;
        Ok(())
    }

    /// Wait for SIGTERM or SIGINT.
    async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
        }
        Ok(())
    }

    /// Ask the host to stop, then wait for its socket to go away.
    pub async fn graceful_stop_host(timeout_secs: u64) -> anyhow::Result<()> {
        let socket_path = get_socket_path();
        let mut client = IpcClient::connect_with_timeout(&socket_path, Duration::from_secs(5))
            .await
            .map_err(|_| anyhow::anyhow!("Host is not running (cannot connect to socket)"))?;

        println!("Sending shutdown request...");
        client.set_timeout(Duration::from_secs(timeout_secs));
        match client.stop().await.context("Failed to send stop request")? {
            IpcResponse::Stopping => {
                println!("Shutdown acknowledged, waiting for host to exit...");
            }
            IpcResponse::Error { message } => anyhow::bail!("Host returned error: {}", message),
            other => return unexpected(other),
        }

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(timeout_secs);
        while start.elapsed() < timeout {
            if !socket_path.exists() {
                return Ok(());
            }
            if IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
                .await
                .is_err()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        anyhow::bail!("Timeout waiting for host to exit ({}s)", timeout_secs)
    }

    /// SIGKILL the host named in the PID file and clean up after it.
    pub fn force_stop_host() -> anyhow::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid_path = get_pid_file_path();
        let pid_str = std::fs::read_to_string(&pid_path)
            .map_err(|_| anyhow::anyhow!("Host PID file not found - is the host running?"))?;
        let pid: i32 = pid_str
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid PID in file: {}", e))?;

        kill(Pid::from_raw(pid), Signal::SIGKILL)
            .map_err(|e| anyhow::anyhow!("Failed to kill host (PID {}): {}", pid, e))?;
        println!("Sent SIGKILL to host (PID {})", pid);

        let _ = std::fs::remove_file(&pid_path);
        let _ = std::fs::remove_file(get_socket_path());
        Ok(())
    }
}

/// Print sessions in a formatted ASCII table.
#[cfg(unix)]
fn print_sessions_table(sessions: &[daemon::ipc::IpcSessionInfo]) {
    if sessions.is_empty() {
        println!("No sessions.");
        return;
    }

    let id_width = sessions
        .iter()
        .map(|s| s.id.len())
        .max()
        .unwrap_or(8)
        .max(8);
    let title_width = sessions
        .iter()
        .map(|s| s.title.len())
        .max()
        .unwrap_or(5)
        .clamp(5, 24);

    println!(
        "{:<id_width$}  {:<title_width$}  {:<10}  {:>10}  CWD",
        "ID",
        "TITLE",
        "STATUS",
        "CREATED",
        id_width = id_width,
        title_width = title_width
    );
    println!("{}", "-".repeat(id_width + title_width + 32));

    for session in sessions {
        let status = match session.exit_code {
            Some(code) => format!("{} ({})", session.status, code),
            None => session.status.to_string(),
        };
        println!(
            "{:<id_width$}  {:<title_width$}  {:<10}  {:>10}  {}",
            session.id,
            truncate_str(&session.title, title_width),
            status,
            format_relative_time(session.created_at / 1000),
            session.cwd,
            id_width = id_width,
            title_width = title_width
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
}

/// Indented outline of a layout tree.
fn render_layout(tree: &LayoutNode) -> String {
    fn walk(node: &LayoutNode, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match node {
            LayoutNode::Leaf(id) => out.push_str(&format!("{indent}{id}\n")),
            LayoutNode::Split {
                direction,
                first,
                second,
                split_ratio,
            } => {
                out.push_str(&format!("{indent}{:?} {:.0}%\n", direction, split_ratio));
                walk(first, depth + 1, out);
                walk(second, depth + 1, out);
            }
        }
    }

    let mut out = String::new();
    walk(tree, 0, &mut out);
    out
}

/// Format a Unix timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let elapsed = now.saturating_sub(timestamp);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Truncate a string to at most `max_len` characters, adding "..." if cut.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
