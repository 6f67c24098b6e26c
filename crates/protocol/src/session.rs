//! Session records shared between the host and its viewers.
//!
//! A [`Session`] is a plain snapshot of one PTY-backed process. The host owns
//! the live process; everything here is data that can be serialized, stored in
//! a workspace file, or handed to a viewer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque session identifier (a UUID v4 string).
pub type SessionId = String;

/// Theme applied to new sessions when none is requested.
pub const DEFAULT_THEME_ID: &str = "default-dark";

/// Exit code reported for a session whose process could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: u32 = 127;

/// The family of shell a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellType {
    /// Windows PowerShell (or `pwsh` elsewhere).
    #[default]
    Powershell,
    /// Windows command prompt.
    Cmd,
    /// GNU bash.
    Bash,
    /// Z shell.
    Zsh,
    /// Windows Subsystem for Linux launcher.
    Wsl,
    /// Anything else, usually an agent command.
    Custom,
}

impl ShellType {
    /// All known shell types in display order.
    pub const ALL: [ShellType; 6] = [
        ShellType::Powershell,
        ShellType::Cmd,
        ShellType::Bash,
        ShellType::Zsh,
        ShellType::Wsl,
        ShellType::Custom,
    ];

    /// Lowercase identifier as used on the wire and in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellType::Powershell => "powershell",
            ShellType::Cmd => "cmd",
            ShellType::Bash => "bash",
            ShellType::Zsh => "zsh",
            ShellType::Wsl => "wsl",
            ShellType::Custom => "custom",
        }
    }

    /// Human readable name, also used as the default session title.
    pub fn display_name(&self) -> &'static str {
        match self {
            ShellType::Powershell => "PowerShell",
            ShellType::Cmd => "Command Prompt",
            ShellType::Bash => "Bash",
            ShellType::Zsh => "Zsh",
            ShellType::Wsl => "WSL",
            ShellType::Custom => "Terminal",
        }
    }
}

impl fmt::Display for ShellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShellType::ALL
            .into_iter()
            .find(|shell| shell.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown shell type: {s}"))
    }
}

/// Lifecycle status of a session as seen from outside.
///
/// Transitions only move forward: `Running` to `Exited` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The process is alive.
    Running,
    /// The process exited on its own or was killed.
    Exited,
    /// The process could not be started.
    Error,
}

impl SessionStatus {
    /// Whether the status is terminal.
    pub fn is_finished(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Running => f.write_str("running"),
            SessionStatus::Exited => f.write_str("exited"),
            SessionStatus::Error => f.write_str("error"),
        }
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// A size is usable only when both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Parameters for creating a session.
///
/// Every field is optional; the host fills in defaults (shell from config,
/// home directory, default theme).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOptions {
    pub shell_type: Option<ShellType>,
    /// Explicit shell executable. Takes precedence over `shell_type` lookup.
    pub shell_path: Option<String>,
    /// Command line to run inside a login shell instead of an interactive shell.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    pub title: Option<String>,
    pub theme_id: Option<String>,
    pub size: Option<TerminalSize>,
}

impl CreateOptions {
    /// Options for a plain interactive shell.
    pub fn shell(shell_type: ShellType) -> Self {
        Self {
            shell_type: Some(shell_type),
            ..Default::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.command = Some(command.into());
        self.args = args;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_theme(mut self, theme_id: impl Into<String>) -> Self {
        self.theme_id = Some(theme_id.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The literal command line an agent session runs, if any.
    pub fn command_line(&self) -> Option<String> {
        let command = self.command.as_deref()?;
        if self.args.is_empty() {
            Some(command.to_string())
        } else {
            Some(format!("{} {}", command, self.args.join(" ")))
        }
    }
}

/// Snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub shell_type: ShellType,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub theme_id: String,
    pub status: SessionStatus,
    /// Present iff `status` is not `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<u32>,
    /// Present iff `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time, Unix milliseconds.
    pub created_at: u64,
    #[serde(default)]
    pub size: TerminalSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl Session {
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Options that would recreate this session from scratch.
    pub fn to_create_options(&self) -> CreateOptions {
        CreateOptions {
            shell_type: Some(self.shell_type),
            shell_path: None,
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: Some(self.cwd.clone()),
            env: self.env.clone(),
            title: Some(self.title.clone()),
            theme_id: Some(self.theme_id.clone()),
            size: Some(self.size),
        }
    }
}

/// A shell known on this platform, with its availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellInfo {
    pub id: ShellType,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub available: bool,
}
