//! Session management module.
//!
//! This module provides PTY spawning and session lifecycle management.
//! Sessions can be created, written to, resized, and killed; their output,
//! title changes and exit codes flow to a single [`EventSink`].

pub mod buffer;
pub mod pty;
pub mod registry;
pub mod sink;
pub mod title;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use buffer::OutputBuffer;
pub use pty::{EventCallback, Lifecycle, PtySession, SessionDefaults, SessionError, SpawnContext};
pub use registry::{SessionManager, SessionRegistry};
pub use sink::{ChannelSink, EventSink, LogSink, NullSink};
pub use title::TitleScanner;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
