//! Workspace, agent preset and startup records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::layout::LayoutNode;
use crate::session::{Session, SessionId};

/// Startup entry id that opens a plain shell instead of an agent.
pub const SHELL_ENTRY_ID: &str = "shell";

/// A saved arrangement of sessions and their layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub layout: Option<LayoutNode>,
    #[serde(default)]
    pub terminals: BTreeMap<SessionId, Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_terminal_id: Option<SessionId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Workspace {
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            layout: None,
            terminals: BTreeMap::new(),
            active_terminal_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }
}

/// A named command-line tool that can be launched into a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPreset {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, alias = "default_cwd", skip_serializing_if = "Option::is_none")]
    pub default_cwd: Option<String>,
    #[serde(default, alias = "default_theme_id", skip_serializing_if = "Option::is_none")]
    pub default_theme_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "built_in")]
    pub built_in: bool,
}

impl AgentPreset {
    /// The literal command line this preset runs.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

fn built_in(id: &str, name: &str, command: &str, theme: &str, description: &str) -> AgentPreset {
    AgentPreset {
        id: id.to_string(),
        name: name.to_string(),
        command: command.to_string(),
        args: Vec::new(),
        default_cwd: None,
        default_theme_id: Some(theme.to_string()),
        description: Some(description.to_string()),
        built_in: true,
    }
}

/// Presets available without any configuration.
pub fn builtin_agents() -> Vec<AgentPreset> {
    vec![
        built_in(
            "claude",
            "Claude Code",
            "claude",
            "claude-dark",
            "Anthropic's agentic coding tool",
        ),
        built_in(
            "codex",
            "Codex CLI",
            "codex",
            "default-dark",
            "OpenAI's coding agent for the terminal",
        ),
        built_in(
            "gemini",
            "Gemini CLI",
            "gemini",
            "default-dark",
            "Google's open-source AI agent",
        ),
    ]
}

/// One item of the ordered startup list: an agent (or `shell`) and an
/// optional working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupEntry {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl StartupEntry {
    pub fn is_shell(&self) -> bool {
        self.agent_id == SHELL_ENTRY_ID
    }
}

/// Parses `AGENT` or `AGENT:CWD`.
///
/// The split happens at the first `:` so drive-letter paths such as
/// `claude:C:\src` keep their colon.
impl FromStr for StartupEntry {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (agent, cwd) = match s.split_once(':') {
            Some((agent, cwd)) => (agent.trim(), Some(cwd.trim())),
            None => (s.trim(), None),
        };
        if agent.is_empty() {
            return Err(ProtocolError::InvalidStartupEntry(s.to_string()));
        }
        Ok(StartupEntry {
            agent_id: agent.to_string(),
            cwd: cwd.filter(|c| !c.is_empty()).map(str::to_string),
        })
    }
}

impl fmt::Display for StartupEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cwd {
            Some(cwd) => write!(f, "{}:{}", self.agent_id, cwd),
            None => f.write_str(&self.agent_id),
        }
    }
}
