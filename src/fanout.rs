#![forbid(unsafe_code)]

//! Per-session push notifications.
//!
//! Each session with at least one listener owns a bounded
//! `tokio::sync::broadcast` channel. Publishing never blocks and never fails:
//! when a listener falls more than `buffer` events behind, the oldest events
//! are overwritten and that listener skips ahead on its next receive
//! (drop-oldest). Events emitted before a listener subscribed are not
//! replayed; late listeners poll the registry instead.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::models::Event;

pub struct Fanout {
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
    buffer: usize,
}

impl Fanout {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Registers a listener for every future event of `session_id`. Dropping
    /// the returned handle unsubscribes.
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        if let Some(sender) = self.channels.read().get(session_id) {
            return Subscription::new(session_id, sender.subscribe());
        }
        let mut channels = self.channels.write();
        let sender = channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0);
        Subscription::new(session_id, sender.subscribe())
    }

    /// Delivers `event` to the current listeners of `session_id`. A session
    /// without listeners makes this a no-op.
    pub fn publish(&self, session_id: &str, event: Event) {
        if let Some(sender) = self.channels.read().get(session_id) {
            // Err only means every receiver has gone away.
            let _ = sender.send(event);
        }
    }

    /// Closes a session's channel; listeners observe end-of-stream.
    pub fn remove_session(&self, session_id: &str) {
        self.channels.write().remove(session_id);
    }

    /// Closes every channel. Used at shutdown so push connections end.
    pub fn close_all(&self) {
        self.channels.write().clear();
    }

    /// Drops channels whose listeners have all disconnected.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }
}

/// Receiving half handed to one listener.
pub struct Subscription {
    session_id: String,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    fn new(session_id: &str, receiver: broadcast::Receiver<Event>) -> Self {
        Self {
            session_id: session_id.to_string(),
            receiver,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event in emission order, or `None` once the session's channel is
    /// closed. Lag is absorbed here by skipping to the oldest retained event.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    debug!(session_id = %self.session_id, missed, "subscriber lagged, dropped oldest events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
impl Fanout {
    fn subscriber_count(&self, session_id: &str) -> usize {
        self.channels
            .read()
            .get(session_id)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }
}
