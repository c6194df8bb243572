//! Conversation event bus.
//!
//! Carries [`ConversationEvent`]s from the code that appends and persists
//! messages to whoever reacts to them (the delivery dispatcher, tests,
//! telemetry). Producers never wait on consumers.

use tokio::sync::broadcast;

use crate::models::ConversationEvent;

/// Broadcast-based bus for conversation lifecycle events.
///
/// Uses `tokio::sync::broadcast` with a configurable buffer size. Slow
/// receivers that fall behind get a `Lagged` error and miss events; delivery
/// and narration persistence are best-effort, so this is acceptable.
pub struct ConversationEventBus {
    tx: broadcast::Sender<ConversationEvent>,
}

impl ConversationEventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers.
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub fn emit(&self, event: ConversationEvent) {
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            conversation_id = %event.conversation_id,
            status = %event.status,
            subscriber_count,
            "ConversationEventBus emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to events. Each subscriber gets its own independent stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ConversationEventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
