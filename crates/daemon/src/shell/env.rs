//! Environment construction for spawned sessions.
//!
//! A host started from a desktop launcher often inherits a thin `PATH` that
//! misses user-level tool directories. [`PathResolver`] merges in a second,
//! authoritative `PATH` (the user registry value on Windows, a login shell's
//! `PATH` on macOS) so agent CLIs installed per user are found.

use std::collections::{BTreeMap, HashSet};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::process::Command;

use super::resolve::Platform;

/// How long a secondary `PATH` lookup may take.
pub const PATH_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of the authoritative user `PATH`.
pub trait UserPathSource: Send + Sync {
    /// The `PATH` value, or `None` if it could not be determined.
    fn user_path(&self) -> Option<String>;
}

/// Source that never has anything to add.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPathSource;

impl UserPathSource for NoPathSource {
    fn user_path(&self) -> Option<String> {
        None
    }
}

/// Reads the user `PATH` from the Windows registry through PowerShell.
#[derive(Debug, Clone)]
pub struct RegistryPathSource {
    timeout: Duration,
}

impl Default for RegistryPathSource {
    fn default() -> Self {
        Self {
            timeout: PATH_LOOKUP_TIMEOUT,
        }
    }
}

impl UserPathSource for RegistryPathSource {
    fn user_path(&self) -> Option<String> {
        let mut cmd = Command::new("powershell.exe");
        cmd.args([
            "-NoProfile",
            "-Command",
            "[Environment]::GetEnvironmentVariable('Path','User')",
        ]);
        run_with_timeout(cmd, self.timeout)
    }
}

/// Asks a login shell for its `PATH`.
#[derive(Debug, Clone)]
pub struct LoginShellPathSource {
    shell: String,
    timeout: Duration,
}

impl LoginShellPathSource {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            timeout: PATH_LOOKUP_TIMEOUT,
        }
    }
}

impl UserPathSource for LoginShellPathSource {
    fn user_path(&self) -> Option<String> {
        let mut cmd = Command::new(&self.shell);
        cmd.args(["-l", "-c", "printf %s \"$PATH\""]);
        run_with_timeout(cmd, self.timeout)
    }
}

/// The secondary source appropriate for `platform`.
pub fn system_path_source(platform: Platform) -> Arc<dyn UserPathSource> {
    match platform {
        Platform::Windows => Arc::new(RegistryPathSource::default()),
        Platform::MacOs => {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/zsh".to_string());
            Arc::new(LoginShellPathSource::new(shell))
        }
        Platform::Linux => Arc::new(NoPathSource),
    }
}

/// Run `cmd` and return its trimmed stdout, or `None` on failure, non-zero
/// exit, empty output or timeout.
///
/// Output is drained while the child runs, so a chatty command cannot stall
/// on a full pipe. The lookup gets its own thread and current-thread runtime
/// because callers may or may not already be inside one.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Option<String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let lookup = move || -> Option<String> {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::debug!(error = %e, "PATH lookup runtime could not be built");
                return None;
            }
        };

        let output = match runtime.block_on(tokio::time::timeout(timeout, cmd.output())) {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "PATH lookup command could not be started");
                return None;
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "PATH lookup timed out");
                return None;
            }
        };

        if !output.status.success() {
            return None;
        }
        let out = String::from_utf8_lossy(&output.stdout);
        let out = out.trim();
        (!out.is_empty()).then(|| out.to_string())
    };

    std::thread::scope(|scope| scope.spawn(lookup).join().ok().flatten())
}

/// Append entries of `extra` missing from `current`.
///
/// Comparison is case-insensitive, empty entries are skipped, and the order
/// of both lists is preserved.
pub fn merge_path_lists(current: &str, extra: &str, separator: char) -> String {
    let mut seen: HashSet<String> = current
        .split(separator)
        .filter(|p| !p.is_empty())
        .map(str::to_lowercase)
        .collect();

    let additions: Vec<&str> = extra
        .split(separator)
        .filter(|p| !p.is_empty() && seen.insert(p.to_lowercase()))
        .collect();

    if additions.is_empty() {
        return current.to_string();
    }

    let sep = separator.to_string();
    if current.is_empty() {
        additions.join(&sep)
    } else {
        format!("{}{}{}", current, separator, additions.join(&sep))
    }
}

/// Builds the environment for new sessions, caching the secondary `PATH`.
pub struct PathResolver {
    platform: Platform,
    source: Arc<dyn UserPathSource>,
    cached: OnceLock<Option<String>>,
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("platform", &self.platform)
            .field("cached", &self.cached.get())
            .finish_non_exhaustive()
    }
}

impl PathResolver {
    pub fn new(platform: Platform, source: Arc<dyn UserPathSource>) -> Self {
        Self {
            platform,
            source,
            cached: OnceLock::new(),
        }
    }

    /// Resolver for the current platform.
    ///
    /// With `enrich` unset no secondary lookup is ever made.
    pub fn system(enrich: bool) -> Self {
        let platform = Platform::current();
        let source = if enrich {
            system_path_source(platform)
        } else {
            Arc::new(NoPathSource)
        };
        Self::new(platform, source)
    }

    /// The secondary `PATH`, queried on first use and cached for the life of
    /// this resolver, including a failed lookup.
    pub fn secondary_path(&self) -> Option<&str> {
        self.cached
            .get_or_init(|| {
                let path = self.source.user_path();
                if path.is_none() {
                    tracing::debug!("No secondary PATH available, using inherited PATH");
                }
                path
            })
            .as_deref()
    }

    /// `base` plus `overrides`, with `PATH` enriched and terminal
    /// capability variables set.
    pub fn enhanced_environment<I>(
        &self,
        base: I,
        overrides: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: BTreeMap<String, String> = base.into_iter().collect();
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(extra) = self.secondary_path() {
            let key = env
                .keys()
                .find(|k| k.eq_ignore_ascii_case("PATH"))
                .cloned()
                .unwrap_or_else(|| "PATH".to_string());
            let current = env.get(&key).map(String::as_str).unwrap_or("");
            let merged = merge_path_lists(current, extra, self.platform.path_separator());
            env.insert(key, merged);
        }

        env.insert("TERM".to_string(), "xterm-256color".to_string());
        env.insert("COLORTERM".to_string(), "truecolor".to_string());
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        value: Option<String>,
    }

    impl CountingSource {
        fn new(value: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                value: value.map(str::to_string),
            })
        }
    }

    impl UserPathSource for CountingSource {
        fn user_path(&self) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value.clone()
        }
    }

    fn base(path_key: &str, path: &str) -> Vec<(String, String)> {
        vec![
            (path_key.to_string(), path.to_string()),
            ("HOME".to_string(), "/home/dev".to_string()),
        ]
    }

    #[test]
    fn test_merge_appends_new_entries_in_order() {
        let merged = merge_path_lists(
            r"C:\Windows;C:\Tools",
            r"c:\tools;C:\Users\dev\AppData\npm;;C:\Users\dev\.cargo\bin",
            ';',
        );
        assert_eq!(
            merged,
            r"C:\Windows;C:\Tools;C:\Users\dev\AppData\npm;C:\Users\dev\.cargo\bin"
        );
    }

    #[test]
    fn test_merge_dedups_within_extra() {
        let merged = merge_path_lists("/usr/bin", "/opt/x:/OPT/X:/usr/bin", ':');
        assert_eq!(merged, "/usr/bin:/opt/x");
    }

    #[test]
    fn test_merge_nothing_new_returns_current() {
        assert_eq!(merge_path_lists("/a:/b", "/B:/a", ':'), "/a:/b");
        assert_eq!(merge_path_lists("/a", "", ':'), "/a");
    }

    #[test]
    fn test_merge_into_empty_current() {
        assert_eq!(merge_path_lists("", "/a:/b", ':'), "/a:/b");
    }

    #[test]
    fn test_secondary_path_is_queried_once() {
        let source = CountingSource::new(Some("/opt/bin"));
        let resolver = PathResolver::new(Platform::Linux, source.clone());

        for _ in 0..3 {
            let env = resolver.enhanced_environment(base("PATH", "/usr/bin"), &BTreeMap::new());
            assert_eq!(env["PATH"], "/usr/bin:/opt/bin");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_lookup_is_cached_and_degrades() {
        let source = CountingSource::new(None);
        let resolver = PathResolver::new(Platform::Windows, source.clone());

        let env = resolver.enhanced_environment(base("Path", r"C:\Windows"), &BTreeMap::new());
        let _ = resolver.enhanced_environment(base("Path", r"C:\Windows"), &BTreeMap::new());

        assert_eq!(env["Path"], r"C:\Windows");
        assert!(!env.contains_key("PATH"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_path_key_matched_case_insensitively() {
        let resolver =
            PathResolver::new(Platform::Windows, CountingSource::new(Some(r"C:\npm")));
        let env = resolver.enhanced_environment(base("Path", r"C:\Windows"), &BTreeMap::new());
        assert_eq!(env["Path"], r"C:\Windows;C:\npm");
        assert!(!env.contains_key("PATH"));
    }

    #[test]
    fn test_overrides_and_terminal_vars() {
        let resolver = PathResolver::new(Platform::Linux, Arc::new(NoPathSource));
        let mut overrides = BTreeMap::new();
        overrides.insert("HOME".to_string(), "/tmp/alt".to_string());
        overrides.insert("TERM".to_string(), "dumb".to_string());

        let env = resolver.enhanced_environment(base("PATH", "/usr/bin"), &overrides);
        assert_eq!(env["HOME"], "/tmp/alt");
        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(env["TERM"], "xterm-256color");
        assert_eq!(env["COLORTERM"], "truecolor");
    }

    #[test]
    fn test_missing_path_is_created_from_secondary() {
        let resolver = PathResolver::new(Platform::Linux, CountingSource::new(Some("/opt/bin")));
        let env = resolver.enhanced_environment(Vec::new(), &BTreeMap::new());
        assert_eq!(env["PATH"], "/opt/bin");
    }

    #[cfg(unix)]
    #[test]
    fn test_login_shell_source_reads_path() {
        let source = LoginShellPathSource::new("/bin/sh");
        let path = source.user_path();
        assert!(path.map(|p| !p.is_empty()).unwrap_or(true));
    }

    #[test]
    fn test_missing_program_yields_none() {
        let cmd = Command::new("/nonexistent/definitely-not-a-shell");
        assert_eq!(run_with_timeout(cmd, Duration::from_secs(1)), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_output_larger_than_pipe_buffer_is_read() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "head -c 200000 /dev/zero | tr '\\0' a"]);

        let started = std::time::Instant::now();
        let out = run_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(out.len(), 200_000);
        assert!(out.bytes().all(|b| b == b'a'));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_command_times_out() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "sleep 10; printf late"]);

        let started = std::time::Instant::now();
        assert_eq!(run_with_timeout(cmd, Duration::from_millis(200)), None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_yields_none() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "printf partial; exit 2"]);
        assert_eq!(run_with_timeout(cmd, Duration::from_secs(5)), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lookup_works_inside_a_runtime() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "printf /opt/bin"]);
        assert_eq!(
            run_with_timeout(cmd, Duration::from_secs(5)).as_deref(),
            Some("/opt/bin")
        );
    }
}
