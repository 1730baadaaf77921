use super::{SessionEvent, SessionEvents, SessionHandle};
use crate::error::MQTTError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Replays whatever the test pushes, then stays silent like an idle broker.
pub(crate) struct ScriptedEvents {
    events: UnboundedReceiver<SessionEvent>,
}

pub(crate) fn scripted() -> (UnboundedSender<SessionEvent>, ScriptedEvents) {
    let (sender, events) = unbounded_channel();
    (sender, ScriptedEvents { events })
}

#[async_trait]
impl SessionEvents for ScriptedEvents {
    async fn next_event(&mut self) -> SessionEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingSession {
    subscriptions: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
    closed: Option<UnboundedSender<SessionEvent>>,
}

impl RecordingSession {
    /// Reports [`SessionEvent::Closed`] once disconnect is requested, the
    /// way the event loop does after writing DISCONNECT.
    pub fn closing(events: &UnboundedSender<SessionEvent>) -> Self {
        RecordingSession {
            closed: Some(events.clone()),
            ..Default::default()
        }
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl SessionHandle for RecordingSession {
    fn subscribe(&self, filter: &str) -> Result<(), MQTTError> {
        self.subscriptions.lock().push(filter.to_owned());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), MQTTError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(events) = &self.closed {
            let _ = events.send(SessionEvent::Closed);
        }
        Ok(())
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until<F: Fn() -> bool>(condition: F) {
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached in time");
}
