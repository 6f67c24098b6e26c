//! Turning a create request into an executable and argument list.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use protocol::{ShellInfo, ShellType};
use serde::{Deserialize, Serialize};

/// Platform family, as far as shell selection is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::Windows)
    }

    /// Separator between `PATH` entries.
    pub fn path_separator(&self) -> char {
        if self.is_windows() {
            ';'
        } else {
            ':'
        }
    }
}

/// Which shell wraps an agent command line.
///
/// `Auto` picks PowerShell on Windows and bash elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentShell {
    #[default]
    Auto,
    Powershell,
    Cmd,
    Bash,
    Zsh,
    Sh,
}

impl AgentShell {
    fn effective(self, platform: Platform) -> AgentShell {
        match (self, platform.is_windows()) {
            (AgentShell::Auto, true) => AgentShell::Powershell,
            (AgentShell::Auto, false) => AgentShell::Bash,
            // POSIX shells are not wrapped on Windows and vice versa.
            (AgentShell::Bash | AgentShell::Zsh | AgentShell::Sh, true) => AgentShell::Powershell,
            (AgentShell::Powershell | AgentShell::Cmd, false) => AgentShell::Bash,
            (other, _) => other,
        }
    }
}

impl fmt::Display for AgentShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentShell::Auto => "auto",
            AgentShell::Powershell => "powershell",
            AgentShell::Cmd => "cmd",
            AgentShell::Bash => "bash",
            AgentShell::Zsh => "zsh",
            AgentShell::Sh => "sh",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentShell {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(AgentShell::Auto),
            "powershell" => Ok(AgentShell::Powershell),
            "cmd" => Ok(AgentShell::Cmd),
            "bash" => Ok(AgentShell::Bash),
            "zsh" => Ok(AgentShell::Zsh),
            "sh" => Ok(AgentShell::Sh),
            other => Err(format!("unknown agent shell: {other}")),
        }
    }
}

/// Environment lookups used during resolution, injectable for tests.
pub trait ShellProbe: Send + Sync {
    /// Whether `program` can be executed: an existing absolute path, or a
    /// name found on `PATH`.
    fn is_available(&self, program: &str) -> bool;

    fn env_var(&self, key: &str) -> Option<String>;
}

/// Probe backed by the real filesystem and process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ShellProbe for SystemProbe {
    fn is_available(&self, program: &str) -> bool {
        let path = Path::new(program);
        if path.is_absolute() {
            path.exists()
        } else {
            which::which(program).is_ok()
        }
    }

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// What to resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRequest<'a> {
    pub shell_type: Option<ShellType>,
    /// Explicit executable, used without any availability check.
    pub shell_path: Option<&'a str>,
    /// Agent command line. When set, the result wraps it in a shell transcript.
    pub command_line: Option<&'a str>,
    pub cwd: &'a str,
}

/// Executable and arguments ready for spawning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

struct KnownShell {
    id: ShellType,
    windows: Option<(&'static str, &'static [&'static str])>,
    unix: Option<(&'static str, &'static [&'static str])>,
}

const KNOWN_SHELLS: &[KnownShell] = &[
    KnownShell {
        id: ShellType::Powershell,
        windows: Some(("powershell.exe", &["-NoLogo"])),
        unix: Some(("pwsh", &["-NoLogo"])),
    },
    KnownShell {
        id: ShellType::Cmd,
        windows: Some(("cmd.exe", &[])),
        unix: None,
    },
    KnownShell {
        id: ShellType::Bash,
        windows: Some(("bash.exe", &[])),
        unix: Some(("/bin/bash", &[])),
    },
    KnownShell {
        id: ShellType::Zsh,
        windows: Some(("zsh.exe", &[])),
        unix: Some(("/bin/zsh", &[])),
    },
    KnownShell {
        id: ShellType::Wsl,
        windows: Some(("wsl.exe", &[])),
        unix: None,
    },
];

fn table_entry(
    shell: ShellType,
    platform: Platform,
) -> Option<(&'static str, &'static [&'static str])> {
    let known = KNOWN_SHELLS.iter().find(|k| k.id == shell)?;
    if platform.is_windows() {
        known.windows
    } else {
        known.unix
    }
}

/// Resolves shells and agent launches for one platform.
#[derive(Clone)]
pub struct ShellResolver {
    platform: Platform,
    agent_shell: AgentShell,
    probe: Arc<dyn ShellProbe>,
}

impl fmt::Debug for ShellResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellResolver")
            .field("platform", &self.platform)
            .field("agent_shell", &self.agent_shell)
            .finish_non_exhaustive()
    }
}

impl Default for ShellResolver {
    fn default() -> Self {
        Self::new(Platform::current(), AgentShell::Auto, Arc::new(SystemProbe))
    }
}

impl ShellResolver {
    pub fn new(platform: Platform, agent_shell: AgentShell, probe: Arc<dyn ShellProbe>) -> Self {
        Self {
            platform,
            agent_shell,
            probe,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Produce the program and arguments for `request`.
    ///
    /// Never fails: unknown or unavailable shell types fall back to the
    /// platform default. Whether the result can actually be spawned is only
    /// known at spawn time.
    pub fn resolve(&self, request: &ShellRequest<'_>) -> ShellCommand {
        match request.command_line {
            Some(line) => self.wrap_command(line, request.cwd),
            None => self.interactive_shell(request),
        }
    }

    fn interactive_shell(&self, request: &ShellRequest<'_>) -> ShellCommand {
        // An explicit executable is taken at its word; if it is missing the
        // spawn fails and the session reports the error.
        if let Some(path) = request.shell_path {
            return ShellCommand::new(path, &[]);
        }

        if let Some(shell) = request.shell_type {
            if let Some((program, args)) = table_entry(shell, self.platform) {
                if self.probe.is_available(program) {
                    return ShellCommand::new(program, args);
                }
                tracing::debug!(shell = %shell, program, "Shell not available, using default");
            }
        }

        ShellCommand::new(self.default_shell_path(), &[])
    }

    /// `COMSPEC` or `cmd.exe` on Windows, `SHELL` or `/bin/bash` elsewhere.
    pub fn default_shell_path(&self) -> String {
        if self.platform.is_windows() {
            self.probe
                .env_var("COMSPEC")
                .unwrap_or_else(|| "cmd.exe".to_string())
        } else {
            self.probe
                .env_var("SHELL")
                .unwrap_or_else(|| "/bin/bash".to_string())
        }
    }

    /// Shell type a session gets when the request names none.
    pub fn default_shell_type(&self) -> ShellType {
        if self.platform.is_windows() {
            return ShellType::Powershell;
        }
        let path = self.default_shell_path();
        match Path::new(&path).file_name().and_then(|n| n.to_str()) {
            Some("zsh") => ShellType::Zsh,
            Some("bash") => ShellType::Bash,
            Some("pwsh") => ShellType::Powershell,
            _ => ShellType::Custom,
        }
    }

    fn wrap_command(&self, line: &str, cwd: &str) -> ShellCommand {
        match self.agent_shell.effective(self.platform) {
            AgentShell::Powershell => {
                let script = format!(
                    "& {{ if (Test-Path $PROFILE) {{ . $PROFILE 2>$null }}; Set-Location -LiteralPath '{}'; {} }}",
                    cwd.replace('\'', "''"),
                    line
                );
                ShellCommand::new("powershell.exe", &["-NoExit", "-Command", &script])
            }
            AgentShell::Cmd => {
                let script = format!("cd /d \"{}\" && {}", cwd.replace('"', ""), line);
                ShellCommand::new("cmd.exe", &["/d", "/s", "/c", &script])
            }
            posix => {
                let (program, rc) = match posix {
                    AgentShell::Zsh => ("/bin/zsh", "$HOME/.zshrc"),
                    AgentShell::Sh => ("/bin/sh", "$HOME/.profile"),
                    _ => ("/bin/bash", "$HOME/.bashrc"),
                };
                let program = if self.probe.is_available(program) {
                    program.to_string()
                } else {
                    self.default_shell_path()
                };
                let script = format!(
                    "cd -- {} || exit 1; [ -f \"{rc}\" ] && . \"{rc}\" >/dev/null 2>&1; {}",
                    posix_quote(cwd),
                    line
                );
                ShellCommand {
                    program,
                    args: vec!["-l".to_string(), "-c".to_string(), script],
                }
            }
        }
    }

    /// Known shells for this platform and whether each can be run.
    pub fn available_shells(&self) -> Vec<ShellInfo> {
        KNOWN_SHELLS
            .iter()
            .filter_map(|known| {
                let (program, args) = table_entry(known.id, self.platform)?;
                Some(ShellInfo {
                    id: known.id,
                    name: known.id.display_name().to_string(),
                    path: program.to_string(),
                    args: args.iter().map(|a| a.to_string()).collect(),
                    available: self.probe.is_available(program),
                })
            })
            .collect()
    }
}

/// Single-quote `s` for a POSIX shell.
fn posix_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// Probe with a fixed set of available programs and variables.
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub available: HashSet<String>,
        pub vars: HashMap<String, String>,
    }

    impl FakeProbe {
        pub fn with(programs: &[&str]) -> Self {
            Self {
                available: programs.iter().map(|p| p.to_string()).collect(),
                vars: HashMap::new(),
            }
        }

        pub fn var(mut self, key: &str, value: &str) -> Self {
            self.vars.insert(key.to_string(), value.to_string());
            self
        }
    }

    impl ShellProbe for FakeProbe {
        fn is_available(&self, program: &str) -> bool {
            self.available.contains(program)
        }

        fn env_var(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    fn resolver(platform: Platform, agent_shell: AgentShell, probe: FakeProbe) -> ShellResolver {
        ShellResolver::new(platform, agent_shell, Arc::new(probe))
    }

    fn shell_request(shell: ShellType) -> ShellRequest<'static> {
        ShellRequest {
            shell_type: Some(shell),
            cwd: "/home/dev",
            ..Default::default()
        }
    }

    #[test]
    fn test_known_shell_on_unix() {
        let r = resolver(
            Platform::Linux,
            AgentShell::Auto,
            FakeProbe::with(&["/bin/zsh"]),
        );
        let cmd = r.resolve(&shell_request(ShellType::Zsh));
        assert_eq!(cmd, ShellCommand::new("/bin/zsh", &[]));
    }

    #[test]
    fn test_unavailable_shell_falls_back_to_env_shell() {
        let r = resolver(
            Platform::Linux,
            AgentShell::Auto,
            FakeProbe::with(&[]).var("SHELL", "/usr/bin/fish"),
        );
        let cmd = r.resolve(&shell_request(ShellType::Zsh));
        assert_eq!(cmd.program, "/usr/bin/fish");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_windows_only_shell_on_unix_falls_back() {
        let r = resolver(Platform::MacOs, AgentShell::Auto, FakeProbe::with(&[]));
        assert_eq!(r.resolve(&shell_request(ShellType::Cmd)).program, "/bin/bash");
        assert_eq!(r.resolve(&shell_request(ShellType::Wsl)).program, "/bin/bash");
    }

    #[test]
    fn test_windows_default_uses_comspec() {
        let r = resolver(
            Platform::Windows,
            AgentShell::Auto,
            FakeProbe::with(&[]).var("COMSPEC", r"C:\Windows\system32\cmd.exe"),
        );
        let cmd = r.resolve(&shell_request(ShellType::Custom));
        assert_eq!(cmd.program, r"C:\Windows\system32\cmd.exe");

        let bare = resolver(Platform::Windows, AgentShell::Auto, FakeProbe::with(&[]));
        assert_eq!(bare.default_shell_path(), "cmd.exe");
    }

    #[test]
    fn test_windows_powershell_gets_nologo() {
        let r = resolver(
            Platform::Windows,
            AgentShell::Auto,
            FakeProbe::with(&["powershell.exe"]),
        );
        let cmd = r.resolve(&shell_request(ShellType::Powershell));
        assert_eq!(cmd, ShellCommand::new("powershell.exe", &["-NoLogo"]));
    }

    #[test]
    fn test_explicit_shell_path_wins() {
        let r = resolver(
            Platform::Linux,
            AgentShell::Auto,
            FakeProbe::with(&["/bin/bash"]),
        );
        let request = ShellRequest {
            shell_type: Some(ShellType::Bash),
            shell_path: Some("/opt/shells/nu"),
            cwd: "/",
            ..Default::default()
        };
        assert_eq!(r.resolve(&request).program, "/opt/shells/nu");
    }

    #[test]
    fn test_unix_agent_transcript() {
        let r = resolver(
            Platform::Linux,
            AgentShell::Auto,
            FakeProbe::with(&["/bin/bash"]),
        );
        let request = ShellRequest {
            command_line: Some("claude --continue"),
            cwd: "/home/dev/it's here",
            ..Default::default()
        };
        let cmd = r.resolve(&request);
        assert_eq!(cmd.program, "/bin/bash");
        assert_eq!(cmd.args[0], "-l");
        assert_eq!(cmd.args[1], "-c");
        assert_eq!(
            cmd.args[2],
            "cd -- '/home/dev/it'\\''s here' || exit 1; \
             [ -f \"$HOME/.bashrc\" ] && . \"$HOME/.bashrc\" >/dev/null 2>&1; claude --continue"
        );
    }

    #[test]
    fn test_unix_zsh_agent_sources_zshrc() {
        let r = resolver(
            Platform::MacOs,
            AgentShell::Zsh,
            FakeProbe::with(&["/bin/zsh"]),
        );
        let cmd = r.resolve(&ShellRequest {
            command_line: Some("codex"),
            cwd: "/tmp",
            ..Default::default()
        });
        assert_eq!(cmd.program, "/bin/zsh");
        assert!(cmd.args[2].contains(". \"$HOME/.zshrc\""));
        assert!(cmd.args[2].ends_with("; codex"));
    }

    #[test]
    fn test_windows_powershell_agent_transcript() {
        let r = resolver(Platform::Windows, AgentShell::Auto, FakeProbe::with(&[]));
        let cmd = r.resolve(&ShellRequest {
            command_line: Some("claude"),
            cwd: r"C:\Users\o'brien\src",
            ..Default::default()
        });
        assert_eq!(cmd.program, "powershell.exe");
        assert_eq!(
            cmd.args,
            vec![
                "-NoExit".to_string(),
                "-Command".to_string(),
                r"& { if (Test-Path $PROFILE) { . $PROFILE 2>$null }; Set-Location -LiteralPath 'C:\Users\o''brien\src'; claude }"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_windows_cmd_agent_transcript() {
        let r = resolver(Platform::Windows, AgentShell::Cmd, FakeProbe::with(&[]));
        let cmd = r.resolve(&ShellRequest {
            command_line: Some("gemini --yolo"),
            cwd: r"D:\work",
            ..Default::default()
        });
        assert_eq!(cmd.program, "cmd.exe");
        assert_eq!(cmd.args[..3], ["/d", "/s", "/c"]);
        assert_eq!(cmd.args[3], r#"cd /d "D:\work" && gemini --yolo"#);
    }

    #[test]
    fn test_posix_agent_shell_ignored_on_windows() {
        let r = resolver(Platform::Windows, AgentShell::Zsh, FakeProbe::with(&[]));
        let cmd = r.resolve(&ShellRequest {
            command_line: Some("claude"),
            cwd: r"C:\",
            ..Default::default()
        });
        assert_eq!(cmd.program, "powershell.exe");
    }

    #[test]
    fn test_default_shell_type_from_env() {
        let zsh = resolver(
            Platform::Linux,
            AgentShell::Auto,
            FakeProbe::with(&[]).var("SHELL", "/usr/bin/zsh"),
        );
        assert_eq!(zsh.default_shell_type(), ShellType::Zsh);

        let fish = resolver(
            Platform::Linux,
            AgentShell::Auto,
            FakeProbe::with(&[]).var("SHELL", "/usr/bin/fish"),
        );
        assert_eq!(fish.default_shell_type(), ShellType::Custom);

        let win = resolver(Platform::Windows, AgentShell::Auto, FakeProbe::with(&[]));
        assert_eq!(win.default_shell_type(), ShellType::Powershell);
    }

    #[test]
    fn test_available_shells_per_platform() {
        let linux = resolver(
            Platform::Linux,
            AgentShell::Auto,
            FakeProbe::with(&["/bin/bash"]),
        );
        let shells = linux.available_shells();
        let ids: Vec<_> = shells.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![ShellType::Powershell, ShellType::Bash, ShellType::Zsh]);
        let bash = shells.iter().find(|s| s.id == ShellType::Bash).unwrap();
        assert!(bash.available);
        assert_eq!(bash.name, "Bash");
        assert!(!shells.iter().find(|s| s.id == ShellType::Zsh).unwrap().available);

        let windows = resolver(Platform::Windows, AgentShell::Auto, FakeProbe::with(&[]));
        assert_eq!(windows.available_shells().len(), 5);
    }

    #[test]
    fn test_agent_shell_parse() {
        assert_eq!("PowerShell".parse::<AgentShell>().unwrap(), AgentShell::Powershell);
        assert_eq!(AgentShell::Sh.to_string(), "sh");
        assert!("fish".parse::<AgentShell>().is_err());
    }

    #[test]
    fn test_path_separator() {
        assert_eq!(Platform::Windows.path_separator(), ';');
        assert_eq!(Platform::Linux.path_separator(), ':');
    }
}
