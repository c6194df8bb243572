//! Rendezvous cache between narration production and its two consumers.
//!
//! Lifecycle for a single message:
//! 1. The narrator computes narration → [`NarrationCache::put`]
//! 2. The ADDED handler attaches it to the pushed message → [`NarrationCache::peek`]
//! 3. The PERSISTED handler writes it to the store → [`NarrationCache::consume`]
//!
//! The delivery path must never remove the entry, since persistence may not
//! have happened yet. Keeping the two reads as separately named methods
//! stops the removing variant from creeping into the delivery path.

use dashmap::DashMap;
use tracing::debug;

/// Concurrent `conversation_id -> narration` store.
///
/// Backed by a sharded map; operations on different conversations never
/// contend on a shared lock, and same-key operations are atomic.
#[derive(Debug, Default)]
pub struct NarrationCache {
    entries: DashMap<String, String>,
}

impl NarrationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or overwrite) the narration for a conversation.
    pub fn put(&self, conversation_id: &str, narration: impl Into<String>) {
        let narration = narration.into();
        debug!(
            conversation_id,
            narration_len = narration.len(),
            "Narration cache put"
        );
        self.entries.insert(conversation_id.to_string(), narration);
    }

    /// Read the narration without removing it.
    pub fn peek(&self, conversation_id: &str) -> Option<String> {
        let found = self.entries.get(conversation_id).map(|e| e.value().clone());
        debug!(conversation_id, found = found.is_some(), "Narration cache peek");
        found
    }

    /// Read and remove the narration in one atomic step.
    pub fn consume(&self, conversation_id: &str) -> Option<String> {
        let found = self.entries.remove(conversation_id).map(|(_, v)| v);
        debug!(
            conversation_id,
            found = found.is_some(),
            "Narration cache consume"
        );
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
