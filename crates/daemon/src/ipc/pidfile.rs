//! PID file handling for detecting a running host.
//!
//! The PID file lives at `$XDG_DATA_HOME/tiledeck/host.pid`, falling back to
//! `~/.local/share/tiledeck/host.pid`. It is written by `tiledeck start` and
//! removed on shutdown; a file naming a dead process is treated as stale and
//! deleted on the next lookup.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Get the path to the host PID file.
pub fn get_pid_file_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        });
    data_dir.join("tiledeck").join("host.pid")
}

/// Whether a host process is currently running.
pub fn is_host_running() -> bool {
    get_host_pid().is_some()
}

/// PID of the running host, if any. Cleans up stale PID files.
pub fn get_host_pid() -> Option<u32> {
    read_live_pid(&get_pid_file_path())
}

fn read_live_pid(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;

    let Ok(pid) = contents.trim().parse::<u32>() else {
        cleanup_stale_pid_file(path);
        return None;
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(path);
        None
    }
}

/// Guard for the PID file of this process; removes the file on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`.
    ///
    /// Fails if another live process already owns the file.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(pid) = read_live_pid(path) {
            anyhow::bail!("host already running (PID {pid})");
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create PID directory: {}", parent.display()))?;
        }
        fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write PID file: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        let ours = fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            == Some(std::process::id());
        if ours {
            cleanup_stale_pid_file(&self.path);
        }
    }
}

/// Whether a process with the given PID exists.
///
/// On Linux this checks `/proc/{pid}`; on other Unix systems it sends
/// signal 0.
fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{pid}/stat")).exists()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        i32::try_from(pid)
            .map(|raw| kill(Pid::from_raw(raw), None).is_ok())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}
