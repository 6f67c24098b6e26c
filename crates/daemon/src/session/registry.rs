//! Registry of live PTY sessions.
//!
//! The registry owns every [`PtySession`], routes control operations to them
//! by id and forwards their events to a single [`EventSink`]. Operations on
//! unknown ids are silent no-ops: a close racing with a write is normal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use protocol::{CreateOptions, Session, SessionEvent, SessionId, TerminalSize};

use super::lock;
use super::pty::{EventCallback, PtySession, SessionError, SpawnContext};
use super::sink::{EventSink, NullSink};
use crate::config::SessionConfig;

/// Control surface over a set of sessions.
///
/// Implementations must be thread-safe; none of the operations fail.
pub trait SessionManager: Send + Sync {
    /// Creates a session. Spawn failures are reported through the returned
    /// session's status.
    fn create(&self, options: CreateOptions) -> Session;

    /// Writes data to a session's input.
    fn write(&self, id: &str, data: &[u8]);

    /// Resizes a session's terminal.
    fn resize(&self, id: &str, size: TerminalSize);

    /// Kills a session and forgets it.
    fn kill(&self, id: &str);

    /// Kills every session.
    fn kill_all(&self);

    /// Gets a snapshot of one session.
    fn get(&self, id: &str) -> Option<Session>;

    /// Snapshots of all sessions, oldest first.
    fn get_all(&self) -> Vec<Session>;

    /// Returns the number of sessions.
    fn count(&self) -> usize {
        self.get_all().len()
    }
}

struct Entry {
    /// Insertion order; creation timestamps collide within a millisecond.
    seq: u64,
    session: Arc<PtySession>,
}

/// Holds a new session's events until its entry is in the map, so a sink
/// reacting to any event (an early exit included) can look the session up.
struct EventGate {
    sink: Arc<dyn EventSink>,
    open: AtomicBool,
    held: Mutex<Vec<SessionEvent>>,
}

impl EventGate {
    fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            open: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        }
    }

    fn send(&self, event: SessionEvent) {
        if self.open.load(Ordering::Acquire) {
            self.sink.send(event);
            return;
        }
        let mut held = lock(&self.held);
        if self.open.load(Ordering::Acquire) {
            drop(held);
            self.sink.send(event);
        } else {
            held.push(event);
        }
    }

    /// Flush held events in order and pass everything through from now on.
    fn release(&self) {
        let mut held = lock(&self.held);
        for event in held.drain(..) {
            self.sink.send(event);
        }
        self.open.store(true, Ordering::Release);
    }
}

/// Thread-safe session registry using DashMap.
pub struct SessionRegistry {
    /// Map of session ID to session.
    sessions: DashMap<SessionId, Entry>,
    next_seq: AtomicU64,
    sink: RwLock<Arc<dyn EventSink>>,
    /// Set by the first `create`; the sink is fixed from then on.
    sink_locked: AtomicBool,
    ctx: SpawnContext,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Creates a new registry spawning sessions with `ctx`.
    pub fn new(ctx: SpawnContext) -> Self {
        Self {
            sessions: DashMap::new(),
            next_seq: AtomicU64::new(0),
            sink: RwLock::new(Arc::new(NullSink)),
            sink_locked: AtomicBool::new(false),
            ctx,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(SpawnContext::from_config(config))
    }

    /// Registers the event subscriber.
    ///
    /// Replaceable until the first session is created.
    pub fn set_output_sink(&self, sink: Arc<dyn EventSink>) -> Result<(), SessionError> {
        let mut current = self
            .sink
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.sink_locked.load(Ordering::SeqCst) {
            return Err(SessionError::SinkLocked);
        }
        *current = sink;
        Ok(())
    }

    fn event_callback(&self) -> (EventCallback, Arc<EventGate>) {
        let sink = {
            let guard = self
                .sink
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            self.sink_locked.store(true, Ordering::SeqCst);
            Arc::clone(&guard)
        };
        let gate = Arc::new(EventGate::new(sink));
        let sender = Arc::clone(&gate);
        (Arc::new(move |event| sender.send(event)), gate)
    }

    fn session(&self, id: &str) -> Option<Arc<PtySession>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.value().session))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Session ids, unordered.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Retained output of a session, oldest chunk first.
    pub fn scrollback(&self, id: &str) -> Option<Vec<Vec<u8>>> {
        self.session(id).map(|s| s.scrollback())
    }

    /// Working directory a session was started in.
    pub fn working_directory(&self, id: &str) -> Option<String> {
        self.session(id).map(|s| s.cwd().to_string())
    }
}

impl SessionManager for SessionRegistry {
    fn create(&self, options: CreateOptions) -> Session {
        let (on_event, gate) = self.event_callback();
        let session = PtySession::create(options, &self.ctx, on_event);
        let snapshot = session.snapshot();

        tracing::info!(
            session_id = %snapshot.id,
            status = %snapshot.status,
            "Created session"
        );

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            snapshot.id.clone(),
            Entry {
                seq,
                session: Arc::new(session),
            },
        );
        gate.release();
        snapshot
    }

    fn write(&self, id: &str, data: &[u8]) {
        match self.session(id) {
            Some(session) => session.write(data),
            None => tracing::debug!(session_id = %id, "Write to unknown session ignored"),
        }
    }

    fn resize(&self, id: &str, size: TerminalSize) {
        match self.session(id) {
            Some(session) => session.resize(size),
            None => tracing::debug!(session_id = %id, "Resize of unknown session ignored"),
        }
    }

    fn kill(&self, id: &str) {
        // The map entry is released before the process is signalled so a
        // concurrent lookup never sees a half-torn-down session.
        match self.sessions.remove(id) {
            Some((_, entry)) => entry.session.kill(),
            None => tracing::debug!(session_id = %id, "Kill of unknown session ignored"),
        }
    }

    fn kill_all(&self) {
        let ids = self.ids();
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Killing all sessions");
        }
        for id in ids {
            self.kill(&id);
        }
    }

    fn get(&self, id: &str) -> Option<Session> {
        self.session(id).map(|s| s.snapshot())
    }

    fn get_all(&self) -> Vec<Session> {
        let mut sessions: Vec<(u64, Arc<PtySession>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.value().seq, Arc::clone(&entry.value().session)))
            .collect();
        sessions.sort_by_key(|(seq, _)| *seq);
        sessions.iter().map(|(_, s)| s.snapshot()).collect()
    }

    fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.kill_all();
    }
}
