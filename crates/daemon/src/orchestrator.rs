//! Orchestration of sessions and the tiled layout.
//!
//! [`Orchestrator`] is the single entry point a window shell talks to: it
//! creates sessions through a [`SessionManager`], keeps the layout tree in
//! step with them, launches agent presets and persists the workspace. Every
//! layout change replaces the whole tree under a lock and is announced on a
//! broadcast channel.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use protocol::layout::{self, Branch, Direction, LayoutNode, DEFAULT_SPLIT_RATIO};
use protocol::{AgentPreset, CreateOptions, Session, SessionId, StartupEntry, Workspace};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::session::pty::now_millis;
use crate::session::SessionManager;
use crate::store::{
    JsonRecentDirectories, JsonWorkspaceStore, NoRecentDirectories, RecentDirectories,
    WorkspaceStore,
};

/// Capacity of the event channel; slow subscribers lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors returned by orchestration requests.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// No preset with this id is configured.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// A layout failed validation.
    #[error("invalid layout: {0}")]
    InvalidLayout(#[from] protocol::ProtocolError),

    /// A layout names a session that does not exist.
    #[error("layout references unknown session: {0}")]
    UnknownTile(SessionId),

    /// Workspace persistence was requested without a store.
    #[error("no workspace store configured")]
    NoWorkspaceStore,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// A session was created and tiled.
    TerminalOpened { session_id: SessionId },
    /// A session was killed and its tile removed.
    TerminalClosed { session_id: SessionId },
    /// The layout tree was replaced.
    LayoutChanged(Option<LayoutNode>),
}

/// Identity of the workspace being edited.
#[derive(Debug, Clone)]
struct WorkspaceMeta {
    id: String,
    name: String,
    created_at: u64,
}

impl Default for WorkspaceMeta {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default".to_string(),
            created_at: now_millis(),
        }
    }
}

/// Facade over sessions, layout, agent presets and persistence.
pub struct Orchestrator {
    sessions: Arc<dyn SessionManager>,
    layout: RwLock<Option<LayoutNode>>,
    active: RwLock<Option<SessionId>>,
    meta: RwLock<WorkspaceMeta>,
    agents: Vec<AgentPreset>,
    recent: Arc<dyn RecentDirectories>,
    workspace_store: Option<Arc<dyn WorkspaceStore>>,
    snap_increment: f64,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("layout", &self.layout())
            .field("agents", &self.agents.len())
            .field("snap_increment", &self.snap_increment)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with no persistence.
    pub fn new(sessions: Arc<dyn SessionManager>, agents: Vec<AgentPreset>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions,
            layout: RwLock::new(None),
            active: RwLock::new(None),
            meta: RwLock::new(WorkspaceMeta::default()),
            agents,
            recent: Arc::new(NoRecentDirectories),
            workspace_store: None,
            snap_increment: 5.0,
            event_tx,
        }
    }

    /// Creates an orchestrator using the configured presets and the JSON
    /// stores in the data directory.
    pub fn from_config(config: &Config, sessions: Arc<dyn SessionManager>) -> Result<Self> {
        let recent = JsonRecentDirectories::open(config.recent_directories_path())
            .context("Failed to load recent directories")?;
        Ok(Self::new(sessions, config.agents.clone())
            .with_recent_directories(Arc::new(recent))
            .with_workspace_store(Arc::new(JsonWorkspaceStore::new(config.workspace_path())))
            .with_snap_increment(config.layout.snap_increment))
    }

    pub fn with_recent_directories(mut self, recent: Arc<dyn RecentDirectories>) -> Self {
        self.recent = recent;
        self
    }

    pub fn with_workspace_store(mut self, store: Arc<dyn WorkspaceStore>) -> Self {
        self.workspace_store = Some(store);
        self
    }

    pub fn with_snap_increment(mut self, increment: f64) -> Self {
        self.snap_increment = increment;
        self
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the session manager.
    pub fn sessions(&self) -> &Arc<dyn SessionManager> {
        &self.sessions
    }

    pub fn agents(&self) -> &[AgentPreset] {
        &self.agents
    }

    pub fn agent(&self, id: &str) -> Option<&AgentPreset> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Current layout tree.
    pub fn layout(&self) -> Option<LayoutNode> {
        self.layout
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Session that was opened most recently and is still tiled.
    pub fn active_terminal(&self) -> Option<SessionId> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active(&self, id: Option<SessionId>) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Replace the layout with `f(current)` and announce the result.
    fn update_layout<F>(&self, f: F) -> Option<LayoutNode>
    where
        F: FnOnce(Option<LayoutNode>) -> Option<LayoutNode>,
    {
        let updated = {
            let mut guard = self.layout.write().unwrap_or_else(PoisonError::into_inner);
            let current = guard.take();
            *guard = f(current);
            guard.clone()
        };
        self.emit_event(OrchestratorEvent::LayoutChanged(updated.clone()));
        updated
    }

    /// Opens a session and tiles it side by side with the current layout.
    pub fn open_new_terminal(&self, options: CreateOptions) -> Session {
        self.split_terminal(options, Direction::Row)
    }

    /// Opens a session and tiles it along `direction`.
    pub fn split_terminal(&self, options: CreateOptions, direction: Direction) -> Session {
        let session = self.sessions.create(options);
        self.update_layout(|tree| Some(layout::add_tile(tree, &session.id, direction)));
        self.set_active(Some(session.id.clone()));

        debug!(session_id = %session.id, ?direction, "Tiled terminal");
        self.emit_event(OrchestratorEvent::TerminalOpened {
            session_id: session.id.clone(),
        });
        session
    }

    /// Launches `preset` in a new tile.
    ///
    /// The working directory is `explicit_cwd`, else the preset's default,
    /// else the home directory. A directory that was actually used is
    /// remembered for the preset.
    pub fn launch_agent(&self, preset: &AgentPreset, explicit_cwd: Option<&str>) -> Session {
        let cwd = explicit_cwd
            .map(str::to_string)
            .or_else(|| preset.default_cwd.clone());

        let mut options = CreateOptions::default()
            .with_command(preset.command.clone(), preset.args.clone())
            .with_title(preset.name.clone());
        if let Some(theme) = &preset.default_theme_id {
            options = options.with_theme(theme.clone());
        }
        if let Some(cwd) = &cwd {
            options = options.with_cwd(cwd.clone());
        }

        info!(agent = %preset.id, cwd = ?cwd, "Launching agent");
        let session = self.open_new_terminal(options);

        if let (Some(dir), false) = (&cwd, session.status.is_finished()) {
            if let Err(e) = self.recent.record(&preset.id, dir) {
                warn!(agent = %preset.id, error = %e, "Failed to record recent directory");
            }
        }
        session
    }

    /// Launches the preset with id `agent_id`.
    pub fn launch(
        &self,
        agent_id: &str,
        explicit_cwd: Option<&str>,
    ) -> Result<Session, OrchestratorError> {
        let preset = self
            .agent(agent_id)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_id.to_string()))?;
        Ok(self.launch_agent(preset, explicit_cwd))
    }

    /// Kills a session and removes its tile. Unknown ids are ignored.
    pub fn close_terminal(&self, id: &str) {
        self.sessions.kill(id);
        let remaining = self.update_layout(|tree| layout::remove_tile(tree, id));

        if self.active_terminal().as_deref() == Some(id) {
            self.set_active(layout::leaves(remaining.as_ref()).pop());
        }

        debug!(session_id = %id, "Closed terminal");
        self.emit_event(OrchestratorEvent::TerminalClosed {
            session_id: id.to_string(),
        });
    }

    /// Closes every session and tile.
    pub fn close_all(&self) {
        let mut ids: Vec<SessionId> = self.sessions.get_all().into_iter().map(|s| s.id).collect();
        for leaf in layout::leaves(self.layout().as_ref()) {
            if !ids.contains(&leaf) {
                ids.push(leaf);
            }
        }
        for id in ids {
            self.close_terminal(&id);
        }
    }

    /// Opens the startup entries in order.
    ///
    /// `shell` opens a plain terminal, a known preset id launches that agent
    /// and anything else is skipped with a warning.
    pub fn apply_startup(&self, entries: &[StartupEntry]) -> Vec<Session> {
        let mut opened = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.is_shell() {
                let mut options = CreateOptions::default();
                if let Some(cwd) = &entry.cwd {
                    options = options.with_cwd(cwd.clone());
                }
                opened.push(self.open_new_terminal(options));
                continue;
            }

            match self.agent(&entry.agent_id) {
                Some(preset) => opened.push(self.launch_agent(preset, entry.cwd.as_deref())),
                None => warn!(agent = %entry.agent_id, "Skipping unknown startup agent"),
            }
        }
        opened
    }

    /// Replaces the layout.
    ///
    /// The tree must be valid and every tile must name a live session.
    pub fn set_layout(&self, tree: Option<LayoutNode>) -> Result<(), OrchestratorError> {
        layout::validate(tree.as_ref())?;
        if let Some(unknown) = layout::leaves(tree.as_ref())
            .into_iter()
            .find(|id| self.sessions.get(id).is_none())
        {
            return Err(OrchestratorError::UnknownTile(unknown));
        }
        self.update_layout(|_| tree);
        Ok(())
    }

    /// Sets the ratio of the split at `path` after a resize gesture.
    pub fn resize_split(&self, path: &[Branch], ratio: f64) -> Option<LayoutNode> {
        self.update_layout(|tree| tree.map(|node| layout::set_split_ratio(node, path, ratio)))
    }

    /// Snaps every split ratio to the configured increment.
    pub fn snap_layout(&self) -> Option<LayoutNode> {
        let increment = self.snap_increment;
        self.update_layout(|tree| layout::snap(tree, increment))
    }

    /// Directory a session was started in, for git inspection.
    pub fn working_directory(&self, id: &str) -> Option<String> {
        self.sessions.get(id).map(|s| s.cwd)
    }

    /// Directories recently used with an agent, most recent first.
    pub fn recent_directories(&self, agent_id: &str) -> Vec<String> {
        self.recent.recent(agent_id)
    }

    /// Captures sessions and layout as a workspace record.
    pub fn snapshot_workspace(&self) -> Workspace {
        let meta = self
            .meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Workspace {
            id: meta.id,
            name: meta.name,
            layout: self.layout(),
            terminals: self
                .sessions
                .get_all()
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect(),
            active_terminal_id: self.active_terminal(),
            created_at: meta.created_at,
            updated_at: now_millis(),
        }
    }

    /// Saves the current workspace through the configured store.
    pub fn save_workspace(&self) -> Result<()> {
        let store = self
            .workspace_store
            .as_ref()
            .ok_or(OrchestratorError::NoWorkspaceStore)?;
        let workspace = self.snapshot_workspace();
        store.save_workspace(&workspace)?;
        info!(
            terminals = workspace.terminals.len(),
            "Saved workspace"
        );
        Ok(())
    }

    /// Recreates the tiled sessions of `workspace`.
    ///
    /// Sessions get new ids; the layout keeps its shape and ratios. Records
    /// that are not tiled are not restored. If a layout already exists the
    /// restored one is placed beside it. An invalid layout is rejected before
    /// any session is created.
    pub fn restore_workspace(
        &self,
        workspace: &Workspace,
    ) -> Result<Vec<Session>, OrchestratorError> {
        layout::validate(workspace.layout.as_ref())?;

        let mut mapping: HashMap<SessionId, SessionId> = HashMap::new();
        let mut restored = Vec::new();

        for old_id in layout::leaves(workspace.layout.as_ref()) {
            let Some(record) = workspace.terminals.get(&old_id) else {
                debug!(session_id = %old_id, "Tile without a terminal record dropped");
                continue;
            };
            let session = self.sessions.create(record.to_create_options());
            mapping.insert(old_id, session.id.clone());
            restored.push(session);
        }

        let tree = workspace
            .layout
            .clone()
            .and_then(|tree| layout::relabel(tree, &mut |old| mapping.get(old).cloned()));
        self.update_layout(|current| match (current, tree) {
            (None, tree) => tree,
            (Some(current), None) => Some(current),
            (Some(current), Some(tree)) => Some(LayoutNode::split(
                Direction::Row,
                current,
                tree,
                DEFAULT_SPLIT_RATIO,
            )),
        });

        let active = workspace
            .active_terminal_id
            .as_ref()
            .and_then(|old| mapping.get(old).cloned())
            .or_else(|| restored.last().map(|s| s.id.clone()));
        if active.is_some() {
            self.set_active(active);
        }

        *self.meta.write().unwrap_or_else(PoisonError::into_inner) = WorkspaceMeta {
            id: workspace.id.clone(),
            name: workspace.name.clone(),
            created_at: workspace.created_at,
        };

        for session in &restored {
            self.emit_event(OrchestratorEvent::TerminalOpened {
                session_id: session.id.clone(),
            });
        }
        info!(restored = restored.len(), workspace = %workspace.id, "Restored workspace");
        Ok(restored)
    }

    /// Loads the saved workspace, if any, and restores it.
    pub fn restore_saved(&self) -> Result<Vec<Session>> {
        let store = self
            .workspace_store
            .as_ref()
            .ok_or(OrchestratorError::NoWorkspaceStore)?;
        match store.load_workspace()? {
            Some(workspace) => Ok(self.restore_workspace(&workspace)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{SessionStatus, ShellType, TerminalSize, DEFAULT_THEME_ID};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory session manager; sessions never run anything.
    #[derive(Default)]
    struct FakeSessions {
        sessions: Mutex<BTreeMap<SessionId, Session>>,
        created: Mutex<Vec<CreateOptions>>,
        killed: Mutex<Vec<SessionId>>,
        next: Mutex<u64>,
    }

    impl SessionManager for FakeSessions {
        fn create(&self, options: CreateOptions) -> Session {
            let n = {
                let mut next = self.next.lock().unwrap();
                *next += 1;
                *next
            };
            let session = Session {
                id: format!("s{n}"),
                title: options.title.clone().unwrap_or_else(|| "Bash".to_string()),
                shell_type: options.shell_type.unwrap_or(ShellType::Bash),
                cwd: options.cwd.clone().unwrap_or_else(|| "/home/dev".to_string()),
                command: options.command.clone(),
                args: options.args.clone(),
                env: options.env.clone(),
                theme_id: options
                    .theme_id
                    .clone()
                    .unwrap_or_else(|| DEFAULT_THEME_ID.to_string()),
                status: SessionStatus::Running,
                exit_code: None,
                error: None,
                created_at: n,
                size: TerminalSize::default(),
                pid: None,
            };
            self.created.lock().unwrap().push(options);
            self.sessions
                .lock()
                .unwrap()
                .insert(session.id.clone(), session.clone());
            session
        }

        fn write(&self, _id: &str, _data: &[u8]) {}

        fn resize(&self, _id: &str, _size: TerminalSize) {}

        fn kill(&self, id: &str) {
            if self.sessions.lock().unwrap().remove(id).is_some() {
                self.killed.lock().unwrap().push(id.to_string());
            }
        }

        fn kill_all(&self) {
            let ids: Vec<_> = self.sessions.lock().unwrap().keys().cloned().collect();
            for id in ids {
                self.kill(&id);
            }
        }

        fn get(&self, id: &str) -> Option<Session> {
            self.sessions.lock().unwrap().get(id).cloned()
        }

        fn get_all(&self) -> Vec<Session> {
            let mut all: Vec<_> = self.sessions.lock().unwrap().values().cloned().collect();
            all.sort_by_key(|s| s.created_at);
            all
        }
    }

    fn orchestrator() -> (Orchestrator, Arc<FakeSessions>) {
        let sessions = Arc::new(FakeSessions::default());
        let orch = Orchestrator::new(sessions.clone(), protocol::builtin_agents());
        (orch, sessions)
    }

    #[test]
    fn test_open_new_terminal_tiles_in_a_row() {
        let (orch, _) = orchestrator();

        let a = orch.open_new_terminal(CreateOptions::default());
        assert_eq!(orch.layout(), Some(LayoutNode::leaf(&a.id)));

        let b = orch.open_new_terminal(CreateOptions::default());
        assert_eq!(
            orch.layout(),
            Some(LayoutNode::split(
                Direction::Row,
                LayoutNode::leaf(&a.id),
                LayoutNode::leaf(&b.id),
                50.0
            ))
        );
        assert_eq!(orch.active_terminal(), Some(b.id));
    }

    #[test]
    fn test_close_first_of_two_leaves_single_leaf() {
        let (orch, sessions) = orchestrator();
        let a = orch.open_new_terminal(CreateOptions::default());
        let b = orch.open_new_terminal(CreateOptions::default());

        orch.close_terminal(&a.id);

        assert_eq!(orch.layout(), Some(LayoutNode::leaf(&b.id)));
        assert!(sessions.get(&a.id).is_none());
        assert_eq!(*sessions.killed.lock().unwrap(), vec![a.id]);
    }

    #[test]
    fn test_close_active_moves_focus_to_last_tile() {
        let (orch, _) = orchestrator();
        let a = orch.open_new_terminal(CreateOptions::default());
        let b = orch.open_new_terminal(CreateOptions::default());

        orch.close_terminal(&b.id);
        assert_eq!(orch.active_terminal(), Some(a.id.clone()));

        orch.close_terminal(&a.id);
        assert_eq!(orch.active_terminal(), None);
        assert_eq!(orch.layout(), None);
    }

    #[test]
    fn test_close_unknown_terminal_is_noop() {
        let (orch, _) = orchestrator();
        let a = orch.open_new_terminal(CreateOptions::default());

        orch.close_terminal("missing");
        assert_eq!(orch.layout(), Some(LayoutNode::leaf(&a.id)));
    }

    #[test]
    fn test_split_terminal_uses_direction() {
        let (orch, _) = orchestrator();
        let a = orch.open_new_terminal(CreateOptions::default());
        let b = orch.split_terminal(CreateOptions::default(), Direction::Column);

        match orch.layout() {
            Some(LayoutNode::Split {
                direction,
                first,
                second,
                ..
            }) => {
                assert_eq!(direction, Direction::Column);
                assert_eq!(*first, LayoutNode::leaf(&a.id));
                assert_eq!(*second, LayoutNode::leaf(&b.id));
            }
            other => panic!("expected a split, got {:?}", other),
        }
    }

    #[test]
    fn test_launch_agent_uses_preset() {
        let (orch, sessions) = orchestrator();
        let preset = orch.agent("claude").unwrap().clone();

        let session = orch.launch_agent(&preset, Some("/work/repo"));

        assert_eq!(session.title, "Claude Code");
        assert_eq!(session.cwd, "/work/repo");
        assert_eq!(session.theme_id, "claude-dark");
        assert_eq!(session.command.as_deref(), Some("claude"));
        let created = sessions.created.lock().unwrap();
        assert_eq!(created[0].command_line().as_deref(), Some("claude"));
    }

    #[test]
    fn test_launch_agent_cwd_fallbacks() {
        let (orch, sessions) = orchestrator();
        let mut preset = orch.agent("codex").unwrap().clone();

        orch.launch_agent(&preset, None);
        preset.default_cwd = Some("/preset/default".to_string());
        let with_default = orch.launch_agent(&preset, None);
        let explicit = orch.launch_agent(&preset, Some("/explicit"));

        let created = sessions.created.lock().unwrap();
        assert_eq!(created[0].cwd, None);
        assert_eq!(with_default.cwd, "/preset/default");
        assert_eq!(explicit.cwd, "/explicit");
    }

    #[test]
    fn test_launch_records_recent_directory() {
        let dir = TempDir::new().unwrap();
        let recent = Arc::new(JsonRecentDirectories::new(dir.path().join("recent.json")));
        let (orch, _) = orchestrator();
        let orch = orch.with_recent_directories(recent);

        orch.launch("gemini", Some("/a")).unwrap();
        orch.launch("gemini", Some("/b")).unwrap();
        orch.launch("gemini", None).unwrap();

        assert_eq!(orch.recent_directories("gemini"), vec!["/b", "/a"]);
        assert!(orch.recent_directories("claude").is_empty());
    }

    #[test]
    fn test_launch_unknown_agent() {
        let (orch, _) = orchestrator();
        assert!(matches!(
            orch.launch("nope", None),
            Err(OrchestratorError::UnknownAgent(id)) if id == "nope"
        ));
        assert_eq!(orch.layout(), None);
    }

    #[test]
    fn test_apply_startup_in_order_skipping_unknown() {
        let (orch, sessions) = orchestrator();
        let entries: Vec<StartupEntry> = ["claude:/repo", "bogus", "shell:/tmp", "codex"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();

        let opened = orch.apply_startup(&entries);

        assert_eq!(opened.len(), 3);
        assert_eq!(opened[0].command.as_deref(), Some("claude"));
        assert_eq!(opened[0].cwd, "/repo");
        assert_eq!(opened[1].command, None);
        assert_eq!(opened[1].cwd, "/tmp");
        assert_eq!(opened[2].command.as_deref(), Some("codex"));
        assert_eq!(sessions.count(), 3);
        assert_eq!(
            layout::leaves(orch.layout().as_ref()),
            opened.iter().map(|s| s.id.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_close_all_twice() {
        let (orch, sessions) = orchestrator();
        for _ in 0..3 {
            orch.open_new_terminal(CreateOptions::default());
        }

        orch.close_all();
        assert_eq!(orch.layout(), None);
        assert_eq!(sessions.count(), 0);

        orch.close_all();
        assert_eq!(orch.layout(), None);
    }

    #[test]
    fn test_set_layout_validates() {
        let (orch, _) = orchestrator();
        let a = orch.open_new_terminal(CreateOptions::default());
        let b = orch.open_new_terminal(CreateOptions::default());

        let duplicate = LayoutNode::split(
            Direction::Row,
            LayoutNode::leaf(&a.id),
            LayoutNode::leaf(&a.id),
            50.0,
        );
        assert!(matches!(
            orch.set_layout(Some(duplicate)),
            Err(OrchestratorError::InvalidLayout(_))
        ));

        let stranger = LayoutNode::leaf("ghost");
        assert!(matches!(
            orch.set_layout(Some(stranger)),
            Err(OrchestratorError::UnknownTile(id)) if id == "ghost"
        ));

        let swapped = LayoutNode::split(
            Direction::Column,
            LayoutNode::leaf(&b.id),
            LayoutNode::leaf(&a.id),
            30.0,
        );
        orch.set_layout(Some(swapped.clone())).unwrap();
        assert_eq!(orch.layout(), Some(swapped));
    }

    #[test]
    fn test_resize_and_snap() {
        let (orch, _) = orchestrator();
        orch.open_new_terminal(CreateOptions::default());
        orch.open_new_terminal(CreateOptions::default());
        let orch = orch.with_snap_increment(10.0);

        orch.resize_split(&[], 33.0);
        let snapped = orch.snap_layout();

        match snapped {
            Some(LayoutNode::Split { split_ratio, .. }) => assert_eq!(split_ratio, 30.0),
            other => panic!("expected a split, got {:?}", other),
        }
    }

    #[test]
    fn test_events_are_broadcast() {
        let (orch, _) = orchestrator();
        let mut rx = orch.subscribe();

        let a = orch.open_new_terminal(CreateOptions::default());
        orch.close_terminal(&a.id);

        assert_eq!(
            rx.try_recv().unwrap(),
            OrchestratorEvent::LayoutChanged(Some(LayoutNode::leaf(&a.id)))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            OrchestratorEvent::TerminalOpened {
                session_id: a.id.clone()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), OrchestratorEvent::LayoutChanged(None));
        assert_eq!(
            rx.try_recv().unwrap(),
            OrchestratorEvent::TerminalClosed { session_id: a.id }
        );
    }

    #[test]
    fn test_working_directory() {
        let (orch, _) = orchestrator();
        let s = orch.open_new_terminal(CreateOptions::default().with_cwd("/src/app"));
        assert_eq!(orch.working_directory(&s.id).as_deref(), Some("/src/app"));
        assert_eq!(orch.working_directory("missing"), None);
    }

    #[test]
    fn test_snapshot_and_restore_preserves_shape() {
        let (orch, _) = orchestrator();
        orch.open_new_terminal(CreateOptions::default().with_cwd("/one"));
        orch.launch("claude", Some("/two")).unwrap();
        let third =
            orch.split_terminal(CreateOptions::default().with_cwd("/three"), Direction::Column);
        orch.resize_split(&[Branch::First], 70.0);

        let saved = orch.snapshot_workspace();
        assert_eq!(saved.terminals.len(), 3);

        let (fresh, sessions) = orchestrator();
        let restored = fresh.restore_workspace(&saved).unwrap();
        assert_eq!(restored.len(), 3);

        // Same tree once ids are mapped back by creation order.
        let old_ids = layout::leaves(saved.layout.as_ref());
        let new_ids = layout::leaves(fresh.layout().as_ref());
        let back: HashMap<_, _> = new_ids.iter().cloned().zip(old_ids.iter().cloned()).collect();
        let mapped = fresh
            .layout()
            .and_then(|t| layout::relabel(t, &mut |id| back.get(id).cloned()));
        assert_eq!(mapped, saved.layout);

        let cwds: Vec<_> = restored.iter().map(|s| s.cwd.clone()).collect();
        assert_eq!(cwds, vec!["/one", "/two", "/three"]);
        assert_eq!(sessions.get(&restored[1].id).unwrap().command.as_deref(), Some("claude"));
        assert_eq!(fresh.active_terminal(), Some(restored[2].id.clone()));
        assert_eq!(saved.active_terminal_id, Some(third.id));
    }

    #[test]
    fn test_restore_drops_tiles_without_records() {
        let (orch, _) = orchestrator();
        let mut ws = Workspace::new("w", "W", 1);
        ws.layout = Some(LayoutNode::split(
            Direction::Row,
            LayoutNode::leaf("gone"),
            LayoutNode::leaf("kept"),
            40.0,
        ));
        let (donor, _) = orchestrator();
        let kept = donor.open_new_terminal(CreateOptions::default().with_cwd("/kept"));
        ws.terminals.insert("kept".to_string(), Session { id: "kept".to_string(), ..kept });

        let restored = orch.restore_workspace(&ws).unwrap();

        assert_eq!(restored.len(), 1);
        assert_eq!(orch.layout(), Some(LayoutNode::leaf(&restored[0].id)));
        assert_eq!(orch.snapshot_workspace().id, "w");
    }

    #[test]
    fn test_restore_rejects_repeated_tile() {
        let (orch, sessions) = orchestrator();
        let (donor, _) = orchestrator();
        let record = donor.open_new_terminal(CreateOptions::default().with_cwd("/x"));

        let mut ws = Workspace::new("w", "W", 1);
        ws.layout = Some(LayoutNode::split(
            Direction::Row,
            LayoutNode::leaf("x"),
            LayoutNode::leaf("x"),
            50.0,
        ));
        ws.terminals.insert("x".to_string(), Session { id: "x".to_string(), ..record });

        assert!(matches!(
            orch.restore_workspace(&ws),
            Err(OrchestratorError::InvalidLayout(_))
        ));
        assert_eq!(sessions.count(), 0);
        assert!(sessions.created.lock().unwrap().is_empty());
        assert_eq!(orch.layout(), None);
        assert_eq!(orch.active_terminal(), None);
    }

    #[test]
    fn test_save_and_restore_through_store() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonWorkspaceStore::new(dir.path().join("workspace.json")));

        let (orch, _) = orchestrator();
        let orch = orch.with_workspace_store(store.clone());
        orch.open_new_terminal(CreateOptions::default().with_cwd("/x"));
        orch.open_new_terminal(CreateOptions::default().with_cwd("/y"));
        orch.save_workspace().unwrap();

        let (fresh, _) = orchestrator();
        let fresh = fresh.with_workspace_store(store);
        let restored = fresh.restore_saved().unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(layout::leaves(fresh.layout().as_ref()).len(), 2);
    }

    #[test]
    fn test_save_without_store_fails() {
        let (orch, _) = orchestrator();
        assert!(orch.save_workspace().is_err());
        assert!(orch.restore_saved().is_err());
    }

    #[test]
    fn test_from_config_uses_data_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.daemon.data_dir = dir.path().to_path_buf();
        config.layout.snap_increment = 25.0;

        let sessions: Arc<dyn SessionManager> = Arc::new(FakeSessions::default());
        let orch = Orchestrator::from_config(&config, sessions).unwrap();
        assert_eq!(orch.agents().len(), 3);

        orch.launch("claude", Some("/proj")).unwrap();
        orch.save_workspace().unwrap();
        assert!(config.workspace_path().exists());
        assert!(config.recent_directories_path().exists());
    }
}
