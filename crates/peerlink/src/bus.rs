//! The event bus seam: where decoded inbound events are delivered.
//!
//! Topics are `"<netID>|<key>"`, e.g. `"2|Move"` or `"0|ACCEPT"`. Game code
//! usually brings its own bus; [`LocalBus`] is a small in-process one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use peerlink_protocol::Event;

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one subscription, for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish/subscribe by topic string.
///
/// Handlers run synchronously inside `publish`. A handler may subscribe or
/// unsubscribe (itself included) while it runs.
pub trait EventBus: Send + Sync + 'static {
    /// Registers `handler` for `topic`.
    fn subscribe(&self, topic: &str, handler: Handler) -> SubscriptionId;

    /// Removes a subscription. Returns `false` if it was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Delivers `event` to every handler on `topic` and returns how many ran.
    fn publish(&self, topic: &str, event: &Event) -> usize;
}

/// In-process [`EventBus`] backed by a map of handler lists.
#[derive(Default)]
pub struct LocalBus {
    topics: Mutex<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers registered on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

impl EventBus for LocalBus {
    fn subscribe(&self, topic: &str, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.lock();
        let mut found = false;
        topics.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(sub, _)| *sub != id);
            found |= handlers.len() != before;
            !handlers.is_empty()
        });
        found
    }

    fn publish(&self, topic: &str, event: &Event) -> usize {
        // Snapshot so handlers can touch the bus without deadlocking.
        let handlers: Vec<Handler> = match self.topics.lock().get(topic) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.lock();
        f.debug_struct("LocalBus")
            .field("topics", &topics.keys().collect::<Vec<_>>())
            .finish()
    }
}
