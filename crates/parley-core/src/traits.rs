//! Collaborator traits consumed by the delivery pipeline.
//!
//! These define the seams between the pipeline and the outside world
//! (connected clients, the durable store, user lookup), enabling pluggable
//! backends and testability.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChatMessage, OutboundMessage};

// =============================================================================
// PRESENCE
// =============================================================================

/// Tracks which users currently hold a live connection.
///
/// Implementations synchronize internally; callers never lock.
pub trait PresenceTracker: Send + Sync {
    /// Record a connect or heartbeat for `session_id` owned by `user_id`.
    fn touch(&self, user_id: &str, session_id: &str, status: Option<&str>);

    /// Whether `user_id` has at least one live session.
    fn is_user_present(&self, user_id: &str) -> bool;

    /// Drop a session (disconnect). Unknown ids are ignored.
    fn remove_session(&self, session_id: &str);
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Pushes payloads to a user's connected clients.
///
/// Fire-and-forget: a failed push is not reported back. The delivery
/// scheduler infers failure from a missing acknowledgment.
pub trait MessageTransport: Send + Sync {
    fn send_to_user(&self, user_id: &str, payload: OutboundMessage);
}

// =============================================================================
// DURABLE STORE
// =============================================================================

/// Durable conversation record.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Write an appended message.
    async fn persist_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<()>;

    /// Attach narration to the most recently persisted message of the conversation.
    async fn update_message_narration(&self, conversation_id: &str, narration: &str)
        -> Result<()>;
}

// =============================================================================
// USER LOOKUP
// =============================================================================

/// Maps a conversation participant to the id their connections are routed by.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when the participant exists but has no routable identity,
    /// or is unknown.
    async fn resolve_delivery_id(&self, user_id: &str) -> Result<Option<String>>;
}
