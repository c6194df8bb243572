//! Core data models for parley.
//!
//! Internal lifecycle events ([`ConversationEvent`]) plus the wire payloads the
//! delivery pipeline pushes to clients ([`OutboundMessage`]) and receives from
//! them ([`ClientFrame`]). Wire types serialize with camelCase field names.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::uuid_utils::new_id;

// =============================================================================
// CONVERSATION MESSAGES
// =============================================================================

/// Author role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message appended to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

// =============================================================================
// LIFECYCLE EVENTS
// =============================================================================

/// Lifecycle transition of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// The message was appended to the in-memory conversation.
    Added,
    /// The durable write of the message completed.
    Persisted,
    /// The durable write of the message failed.
    PersistenceFailed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Added => "ADDED",
            MessageStatus::Persisted => "PERSISTED",
            MessageStatus::PersistenceFailed => "PERSISTENCE_FAILED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle transition of one message, fired by the conversation service.
///
/// Built with one of the status constructors and the `with_*` setters before
/// it is emitted; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    pub conversation_id: String,
    pub status: MessageStatus,
    pub message: Option<ChatMessage>,
    pub from_user_id: Option<String>,
    pub to_user_id: Option<String>,
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl ConversationEvent {
    fn new(conversation_id: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            status,
            message: None,
            from_user_id: None,
            to_user_id: None,
            title: None,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// A message was appended to the conversation.
    pub fn added(conversation_id: impl Into<String>, message: ChatMessage) -> Self {
        let mut event = Self::new(conversation_id, MessageStatus::Added);
        event.message = Some(message);
        event
    }

    /// The message was written to the durable store.
    pub fn persisted(conversation_id: impl Into<String>, message: ChatMessage) -> Self {
        let mut event = Self::new(conversation_id, MessageStatus::Persisted);
        event.message = Some(message);
        event
    }

    /// The durable write failed with `error`.
    pub fn persistence_failed(
        conversation_id: impl Into<String>,
        message: ChatMessage,
        error: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(conversation_id, MessageStatus::PersistenceFailed);
        event.message = Some(message);
        event.error = Some(error.into());
        event
    }

    pub fn with_from_user(mut self, user_id: impl Into<String>) -> Self {
        self.from_user_id = Some(user_id.into());
        self
    }

    pub fn with_to_user(mut self, user_id: impl Into<String>) -> Self {
        self.to_user_id = Some(user_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Drop the message payload (the append path sometimes has none).
    pub fn without_message(mut self) -> Self {
        self.message = None;
        self
    }

    /// Role of the carried message, if any.
    pub fn role(&self) -> Option<Role> {
        self.message.as_ref().map(|m| m.role)
    }
}

// =============================================================================
// WIRE PAYLOADS (server → client)
// =============================================================================

/// A conversation message as pushed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    /// UUIDv7 string; the client echoes it back in its [`MessageAck`].
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub body: String,
    pub ts: DateTime<Utc>,
    pub author_id: Option<String>,
    pub title: Option<String>,
    /// Speech-friendly rendering of `body`, when one was produced in time.
    pub narration: Option<String>,
}

/// Typing/progress indicator. `status: None` clears the indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub id: String,
    pub from_user_id: String,
    pub status: Option<String>,
    pub ts: DateTime<Utc>,
}

impl StatusMessage {
    pub fn new(from_user_id: impl Into<String>, status: Option<String>) -> Self {
        Self {
            id: new_id(),
            from_user_id: from_user_id.into(),
            status,
            ts: Utc::now(),
        }
    }

    /// Status that clears any indicator shown for `from_user_id`.
    pub fn clear(from_user_id: impl Into<String>) -> Self {
        Self::new(from_user_id, None)
    }
}

/// Session list update so the client can refresh titles without polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: String,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub ts: DateTime<Utc>,
}

impl SessionEvent {
    pub fn created(session_id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            title,
            kind: "created".to_string(),
            ts: Utc::now(),
        }
    }
}

/// Everything the server pushes to a user, tagged by client-side destination.
///
/// ```text
/// {"destination":"messages","payload":{"id":"...","sessionId":"...",...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "destination", content = "payload", rename_all = "lowercase")]
pub enum OutboundMessage {
    Messages(DeliveredMessage),
    Status(StatusMessage),
    Session(SessionEvent),
}

impl OutboundMessage {
    /// Destination name used for logging and routing.
    pub fn destination(&self) -> &'static str {
        match self {
            OutboundMessage::Messages(_) => "messages",
            OutboundMessage::Status(_) => "status",
            OutboundMessage::Session(_) => "session",
        }
    }
}

// =============================================================================
// WIRE PAYLOADS (client → server)
// =============================================================================

/// Client acknowledgment that a delivered message was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub message_id: String,
}

/// Client heartbeat carrying an optional status ("active", "idle", ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresencePing {
    #[serde(default)]
    pub status: Option<String>,
}

/// Frames a connected client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Ack(MessageAck),
    Ping(PresencePing),
}

impl ClientFrame {
    /// Parse a text frame received from a client.
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

/// One live transport session of a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    pub session_id: String,
    pub last_seen: DateTime<Utc>,
    pub status: String,
}

impl Presence {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        status: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            last_seen: Utc::now(),
            status: status.unwrap_or_else(|| defaults::PRESENCE_STATUS.to_string()),
        }
    }
}
