//! In-memory collaborators for running the pipeline without external systems.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use parley_core::{ChatMessage, ConversationStore, Error, Result, UserDirectory};

/// Conversation store that keeps everything in process memory.
///
/// Narration updates attach to the conversation's latest persisted message.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    messages: DashMap<String, Vec<ChatMessage>>,
    narrations: DashMap<String, String>,
    failing: AtomicBool,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages persisted for a conversation, oldest first.
    pub fn persisted(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.messages
            .get(conversation_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Narration stored on the conversation's latest message.
    pub fn narration_for(&self, conversation_id: &str) -> Option<String> {
        self.narrations.get(conversation_id).map(|n| n.clone())
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Store("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn persist_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<()> {
        self.check_available()?;
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        debug!(conversation_id, role = %message.role, "Message persisted");
        Ok(())
    }

    async fn update_message_narration(&self, conversation_id: &str, narration: &str) -> Result<()> {
        self.check_available()?;
        if !self.messages.contains_key(conversation_id) {
            return Err(Error::NotFound(format!(
                "no persisted message in conversation {conversation_id}"
            )));
        }
        self.narrations
            .insert(conversation_id.to_string(), narration.to_string());
        Ok(())
    }
}

/// Participant id → routing id table.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    routes: DashMap<String, String>,
    /// Resolve unknown participants to themselves.
    identity_fallback: bool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory where every participant is routed by its own id unless
    /// mapped otherwise.
    pub fn identity() -> Self {
        Self {
            routes: DashMap::new(),
            identity_fallback: true,
        }
    }

    pub fn insert(&self, user_id: impl Into<String>, delivery_id: impl Into<String>) {
        self.routes.insert(user_id.into(), delivery_id.into());
    }

    pub fn remove(&self, user_id: &str) {
        self.routes.remove(user_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve_delivery_id(&self, user_id: &str) -> Result<Option<String>> {
        let route = self.routes.get(user_id).map(|r| r.clone());
        Ok(route.or_else(|| self.identity_fallback.then(|| user_id.to_string())))
    }
}
