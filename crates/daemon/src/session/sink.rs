//! Destinations for session events.

use protocol::SessionEvent;
use tokio::sync::mpsc;

/// The single subscriber of session events.
///
/// Called from PTY reader threads, so implementations must not block for
/// long; events of one session arrive in order.
pub trait EventSink: Send + Sync {
    fn send(&self, event: SessionEvent);
}

impl<F> EventSink for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn send(&self, event: SessionEvent) {
        self(event)
    }
}

/// Discards everything. Used until a real sink is registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&self, _event: SessionEvent) {}
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

/// Logs lifecycle events; output is only counted at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn send(&self, event: SessionEvent) {
        match event {
            SessionEvent::Output { id, data } => {
                tracing::trace!(session_id = %id, bytes = data.len(), "Session output");
            }
            SessionEvent::Title { id, title } => {
                tracing::debug!(session_id = %id, title = %title, "Session title changed");
            }
            SessionEvent::Exit { id, code } => {
                tracing::info!(session_id = %id, exit_code = code, "Session process exited");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        for i in 0..3u8 {
            sink.send(SessionEvent::Output {
                id: "s".into(),
                data: vec![i],
            });
        }
        for i in 0..3u8 {
            match rx.recv().await {
                Some(SessionEvent::Output { data, .. }) => assert_eq!(data, vec![i]),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.send(SessionEvent::Exit {
            id: "s".into(),
            code: 0,
        });
    }

    #[test]
    fn test_closure_sink() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |event: SessionEvent| seen.lock().unwrap().push(event.session_id().to_string());
        sink.send(SessionEvent::Title {
            id: "t".into(),
            title: "x".into(),
        });
        assert_eq!(*seen.lock().unwrap(), vec!["t".to_string()]);
    }
}
