//! Configuration management for the tiledeck host.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/tiledeck/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::{builtin_agents, AgentPreset, ShellType, TerminalSize, SHELL_ENTRY_ID};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shell::{AgentShell, Platform};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("default_shell must be a known shell or an existing executable, got {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("scrollback_chunks must be between 1 and 1000000, got {0}")]
    InvalidScrollback(usize),

    #[error("terminal size must be non-zero, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("snap_increment must be between 0 and 50, got {0}")]
    InvalidSnapIncrement(f64),

    #[error("kill_grace_ms must be at most 60000, got {0}")]
    InvalidKillGrace(u64),

    #[error("agent preset {0:?} is invalid: id and command must be non-empty and id must not be \"shell\"")]
    InvalidAgent(String),

    #[error("agent preset id {0:?} is defined more than once")]
    DuplicateAgent(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the tiledeck host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// General host configuration.
    pub daemon: DaemonConfig,

    /// Session defaults.
    pub session: SessionConfig,

    /// Layout behaviour.
    pub layout: LayoutConfig,

    /// Agent presets available for launching.
    pub agents: Vec<AgentPreset>,
}

/// General host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for the workspace file, recent directories and logs.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// When to scan output for window-title sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleDetection {
    /// On everywhere except Windows, where the console host handles titles.
    #[default]
    Auto,
    On,
    Off,
}

impl TitleDetection {
    pub fn enabled(&self, platform: Platform) -> bool {
        match self {
            TitleDetection::Auto => !platform.is_windows(),
            TitleDetection::On => true,
            TitleDetection::Off => false,
        }
    }
}

/// Session defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell for new sessions: a shell id (`bash`, `powershell`, ...) or a
    /// path to an executable.
    pub default_shell: String,

    /// Shell that wraps agent command lines.
    pub agent_shell: AgentShell,

    /// Theme id for sessions that don't request one.
    pub default_theme: String,

    /// Output chunks retained per session for replay.
    pub scrollback_chunks: usize,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// Milliseconds between the polite termination signal and the forced one.
    pub kill_grace_ms: u64,

    /// Title sequence scanning.
    pub detect_titles: TitleDetection,

    /// Merge the user-level PATH into session environments.
    pub enrich_path: bool,
}

/// Layout behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Percentage step split ratios snap to (0 disables snapping).
    pub snap_increment: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            session: SessionConfig::default(),
            layout: LayoutConfig::default(),
            agents: builtin_agents(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            agent_shell: AgentShell::Auto,
            default_theme: protocol::DEFAULT_THEME_ID.to_string(),
            scrollback_chunks: 10_000,
            cols: 80,
            rows: 24,
            kill_grace_ms: 500,
            detect_titles: TitleDetection::Auto,
            enrich_path: true,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            snap_increment: 5.0,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tiledeck")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tiledeck")
}

/// Returns the default shell id for the current platform.
fn default_shell() -> String {
    if cfg!(windows) {
        return ShellType::Powershell.to_string();
    }
    match std::env::var("SHELL") {
        Ok(shell) if shell.ends_with("/zsh") => ShellType::Zsh.to_string(),
        Ok(shell) if shell.ends_with("/bash") => ShellType::Bash.to_string(),
        Ok(shell) if !shell.is_empty() => shell,
        _ => ShellType::Bash.to_string(),
    }
}

impl SessionConfig {
    /// Initial terminal size.
    pub fn size(&self) -> TerminalSize {
        TerminalSize::new(self.cols, self.rows)
    }

    /// `default_shell` split into a shell type or an explicit path.
    pub fn default_shell_choice(&self) -> (Option<ShellType>, Option<&str>) {
        match self.default_shell.parse::<ShellType>() {
            Ok(shell) => (Some(shell), None),
            Err(_) if self.default_shell.is_empty() => (None, None),
            Err(_) => (None, Some(self.default_shell.as_str())),
        }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TILEDECK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - TILEDECK_DEFAULT_SHELL: Override the default shell
    /// - TILEDECK_DATA_DIR: Override the data directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TILEDECK_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(shell) = std::env::var("TILEDECK_DEFAULT_SHELL") {
            if !shell.is_empty() {
                tracing::info!("Overriding default_shell from environment: {}", shell);
                self.session.default_shell = shell;
            }
        }

        if let Ok(dir) = std::env::var("TILEDECK_DATA_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding data_dir from environment: {}", dir);
                self.daemon.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;

        if session.scrollback_chunks < 1 || session.scrollback_chunks > 1_000_000 {
            return Err(ConfigError::InvalidScrollback(session.scrollback_chunks));
        }

        if !session.size().is_valid() {
            return Err(ConfigError::InvalidTerminalSize {
                cols: session.cols,
                rows: session.rows,
            });
        }

        if session.kill_grace_ms > 60_000 {
            return Err(ConfigError::InvalidKillGrace(session.kill_grace_ms));
        }

        let snap = self.layout.snap_increment;
        if !(0.0..=50.0).contains(&snap) {
            return Err(ConfigError::InvalidSnapIncrement(snap));
        }

        // A known shell id is always acceptable; resolution falls back to the
        // platform default if it is missing. A path must exist.
        if let (None, Some(path)) = session.default_shell_choice() {
            let shell_path = Path::new(path);
            let found = if shell_path.is_absolute() {
                shell_path.exists()
            } else {
                which::which(path).is_ok()
            };
            if !found {
                return Err(ConfigError::InvalidShellPath(path.to_string()));
            }
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty()
                || agent.command.trim().is_empty()
                || agent.id == SHELL_ENTRY_ID
            {
                return Err(ConfigError::InvalidAgent(agent.id.clone()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.id.clone()));
            }
        }

        // Validate log_level is a known value
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Look up an agent preset by id.
    pub fn agent(&self, id: &str) -> Option<&AgentPreset> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Path of the saved workspace file.
    pub fn workspace_path(&self) -> PathBuf {
        self.daemon.data_dir.join("workspace.json")
    }

    /// Path of the recent-directories file.
    pub fn recent_directories_path(&self) -> PathBuf {
        self.daemon.data_dir.join("recent_directories.json")
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.daemon.data_dir.join("logs")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
