//! Notifications a session pushes to its subscriber.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// One notification from a session.
///
/// For a given session, events arrive in the order they were produced, and
/// `Exit` is the last event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEvent {
    /// Raw terminal output, unmodified.
    Output {
        id: SessionId,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// The process exited.
    Exit { id: SessionId, code: u32 },
    /// The program set the window title.
    Title { id: SessionId, title: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Output { id, .. }
            | SessionEvent::Exit { id, .. }
            | SessionEvent::Title { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_accessor() {
        let events = [
            SessionEvent::Output {
                id: "a".into(),
                data: b"hi".to_vec(),
            },
            SessionEvent::Exit {
                id: "a".into(),
                code: 0,
            },
            SessionEvent::Title {
                id: "a".into(),
                title: "vim".into(),
            },
        ];
        assert!(events.iter().all(|e| e.session_id() == "a"));
    }

    #[test]
    fn test_tagged_json() {
        let json = serde_json::to_value(SessionEvent::Exit {
            id: "x".into(),
            code: 3,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "exit", "id": "x", "code": 3}));
    }
}
