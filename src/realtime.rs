//! Best-effort fan-out of comment activity to connected viewers.
//!
//! Persisted writes are the source of truth; a dropped delivery is never
//! retried and never rolls anything back.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentEventKind {
    Created,
    Updated,
    Deleted,
}

/// One comment state change, keyed by the listing it belongs to so
/// subscribers can filter to the conversation they are viewing.
#[derive(Debug, Clone, Serialize)]
pub struct CommentEvent {
    pub listing_id: Id,
    pub comment_id: Id,
    pub author_id: Id,
    pub kind: CommentEventKind,
}

pub struct EventBus {
    sender: broadcast::Sender<CommentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Fire-and-forget publish; no subscribers is not an error.
    pub fn emit(&self, event: CommentEvent) {
        trace!(?event, "emitting comment event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommentEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
