//! Persistent workspace and recent-directory storage.
//!
//! The host only needs two small things from a store: the last saved
//! [`Workspace`] and a per-agent list of recently used directories. Both are
//! traits so an embedding UI can supply its own store; the JSON file
//! implementations here live in the data directory and write atomically
//! (temp file, then rename).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use protocol::Workspace;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Maximum number of directories remembered per agent.
pub const MAX_RECENT_DIRECTORIES: usize = 10;

/// Loads and saves the workspace.
pub trait WorkspaceStore: Send + Sync {
    /// The saved workspace, or `None` if nothing was saved yet.
    fn load_workspace(&self) -> Result<Option<Workspace>>;

    fn save_workspace(&self, workspace: &Workspace) -> Result<()>;
}

/// Most-recently-used working directories, per agent.
pub trait RecentDirectories: Send + Sync {
    /// Directories for `agent_id`, most recent first.
    fn recent(&self, agent_id: &str) -> Vec<String>;

    /// Move `dir` to the front of the list for `agent_id`.
    fn record(&self, agent_id: &str, dir: &str) -> Result<()>;

    fn remove(&self, agent_id: &str, dir: &str) -> Result<()>;

    fn clear(&self, agent_id: &str) -> Result<()>;
}

/// Recent-directory store that remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecentDirectories;

impl RecentDirectories for NoRecentDirectories {
    fn recent(&self, _agent_id: &str) -> Vec<String> {
        Vec::new()
    }

    fn record(&self, _agent_id: &str, _dir: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _agent_id: &str, _dir: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self, _agent_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Reads `path` as JSON. A missing file yields `None`.
fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Option<T>> {
    if !path.exists() {
        tracing::debug!("{} file not found at {:?}", what, path);
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}: {}", what, path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}: {}", what, path.display()))?;
    Ok(Some(value))
}

/// Writes `value` as pretty JSON through a temp file and a rename.
fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {} directory: {}", what, parent.display()))?;
    }

    let contents =
        serde_json::to_string_pretty(value).with_context(|| format!("Failed to serialize {what}"))?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &contents)
        .with_context(|| format!("Failed to write temp {}: {}", what, temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename temp {} {} to {}",
            what,
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Workspace stored as a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonWorkspaceStore {
    path: PathBuf,
}

impl JsonWorkspaceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkspaceStore for JsonWorkspaceStore {
    fn load_workspace(&self) -> Result<Option<Workspace>> {
        let workspace: Option<Workspace> = read_json(&self.path, "workspace")?;
        if let Some(ws) = &workspace {
            protocol::layout::validate(ws.layout.as_ref())
                .with_context(|| format!("Invalid layout in {}", self.path.display()))?;
            tracing::info!(
                terminals = ws.terminals.len(),
                "Loaded workspace from {:?}",
                self.path
            );
        }
        Ok(workspace)
    }

    fn save_workspace(&self, workspace: &Workspace) -> Result<()> {
        write_json(&self.path, workspace, "workspace")?;
        tracing::debug!(
            terminals = workspace.terminals.len(),
            "Saved workspace to {:?}",
            self.path
        );
        Ok(())
    }
}

/// On-disk shape of the recent-directories file.
#[derive(Debug, Serialize, Deserialize)]
struct RecentDirectoriesData {
    /// Version of the file format.
    version: u32,
    agents: BTreeMap<String, Vec<String>>,
}

impl Default for RecentDirectoriesData {
    fn default() -> Self {
        Self {
            version: 1,
            agents: BTreeMap::new(),
        }
    }
}

/// Recent directories kept in memory and mirrored to a JSON file on every
/// change.
pub struct JsonRecentDirectories {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Vec<String>>>,
}

impl JsonRecentDirectories {
    /// Creates an empty store persisting to `path`.
    ///
    /// This does not read the file; call `load()` for that.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a store and loads the file if it exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the file, replacing the in-memory lists.
    pub fn load(&self) -> Result<()> {
        let data: RecentDirectoriesData =
            read_json(&self.path, "recent directories")?.unwrap_or_default();

        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on recent directories"))?;
        *entries = data
            .agents
            .into_iter()
            .map(|(agent, mut dirs)| {
                dirs.truncate(MAX_RECENT_DIRECTORIES);
                (agent, dirs)
            })
            .collect();
        Ok(())
    }

    fn update<F>(&self, agent_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<String>),
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on recent directories"))?;

        let dirs = entries.entry(agent_id.to_string()).or_default();
        f(dirs);
        if dirs.is_empty() {
            entries.remove(agent_id);
        }

        let data = RecentDirectoriesData {
            version: 1,
            agents: entries.clone(),
        };
        write_json(&self.path, &data, "recent directories")
    }
}

impl RecentDirectories for JsonRecentDirectories {
    fn recent(&self, agent_id: &str) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.get(agent_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn record(&self, agent_id: &str, dir: &str) -> Result<()> {
        self.update(agent_id, |dirs| {
            dirs.retain(|d| d != dir);
            dirs.insert(0, dir.to_string());
            dirs.truncate(MAX_RECENT_DIRECTORIES);
        })
    }

    fn remove(&self, agent_id: &str, dir: &str) -> Result<()> {
        self.update(agent_id, |dirs| dirs.retain(|d| d != dir))
    }

    fn clear(&self, agent_id: &str) -> Result<()> {
        self.update(agent_id, Vec::clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Direction, LayoutNode};
    use tempfile::TempDir;

    #[test]
    fn test_workspace_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonWorkspaceStore::new(dir.path().join("workspace.json"));
        assert!(store.load_workspace().unwrap().is_none());
    }

    #[test]
    fn test_workspace_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("workspace.json");
        let store = JsonWorkspaceStore::new(&path);

        let mut ws = Workspace::new("default", "Default", 1_700_000_000_000);
        ws.layout = Some(LayoutNode::split(
            Direction::Column,
            LayoutNode::leaf("a"),
            LayoutNode::leaf("b"),
            30.0,
        ));
        store.save_workspace(&ws).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(store.load_workspace().unwrap(), Some(ws));
    }

    #[test]
    fn test_workspace_rejects_duplicate_tiles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workspace.json");
        fs::write(
            &path,
            r#"{"id":"w","name":"W","layout":{"direction":"row","first":"a","second":"a"},
               "createdAt":0,"updatedAt":0}"#,
        )
        .unwrap();

        let store = JsonWorkspaceStore::new(&path);
        assert!(store.load_workspace().is_err());
    }

    #[test]
    fn test_workspace_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workspace.json");
        fs::write(&path, "not json").unwrap();

        let err = JsonWorkspaceStore::new(&path).load_workspace().unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse workspace"));
    }

    #[test]
    fn test_recent_most_recent_first_without_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecentDirectories::new(dir.path().join("recent.json"));

        store.record("claude", "/a").unwrap();
        store.record("claude", "/b").unwrap();
        store.record("claude", "/a").unwrap();

        assert_eq!(store.recent("claude"), vec!["/a", "/b"]);
        assert!(store.recent("codex").is_empty());
    }

    #[test]
    fn test_recent_capped_per_agent() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecentDirectories::new(dir.path().join("recent.json"));

        for i in 0..15 {
            store.record("codex", &format!("/dir/{i}")).unwrap();
        }

        let recent = store.recent("codex");
        assert_eq!(recent.len(), MAX_RECENT_DIRECTORIES);
        assert_eq!(recent[0], "/dir/14");
        assert_eq!(recent[9], "/dir/5");
    }

    #[test]
    fn test_recent_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecentDirectories::new(dir.path().join("recent.json"));

        store.record("gemini", "/x").unwrap();
        store.record("gemini", "/y").unwrap();
        store.remove("gemini", "/x").unwrap();
        assert_eq!(store.recent("gemini"), vec!["/y"]);

        store.clear("gemini").unwrap();
        assert!(store.recent("gemini").is_empty());
    }

    #[test]
    fn test_recent_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recent.json");

        {
            let store = JsonRecentDirectories::new(&path);
            store.record("claude", "/work/one").unwrap();
            store.record("claude", "/work/two").unwrap();
        }

        let reopened = JsonRecentDirectories::open(&path).unwrap();
        assert_eq!(reopened.recent("claude"), vec!["/work/two", "/work/one"]);
    }

    #[test]
    fn test_no_recent_directories_remembers_nothing() {
        let store = NoRecentDirectories;
        store.record("claude", "/a").unwrap();
        assert!(store.recent("claude").is_empty());
    }
}
