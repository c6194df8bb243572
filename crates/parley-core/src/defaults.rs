//! Centralized default constants for parley.
//!
//! **This module is the single source of truth** for shared default values.
//! Config types in the other crates read these instead of defining their own
//! magic numbers.

// =============================================================================
// DELIVERY
// =============================================================================

/// Maximum number of sends (initial push included) before a delivery is abandoned.
pub const DELIVERY_MAX_ATTEMPTS: u32 = 5;

/// Backoff delays between delivery attempts, in milliseconds.
///
/// Attempt indexes past the end of the table reuse the last entry.
pub const DELIVERY_BACKOFF_MS: [u64; 5] = [3_000, 6_000, 12_000, 24_000, 36_000];

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer for the conversation event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Recent messages kept in memory per conversation.
pub const CONVERSATION_LOG_LIMIT: usize = 200;

// =============================================================================
// PRESENCE
// =============================================================================

/// Status recorded for a session that pinged without one.
pub const PRESENCE_STATUS: &str = "active";

/// Sessions not seen for this long are pruned.
pub const PRESENCE_TTL_SECS: u64 = 90;

/// How often the server sweeps stale presence entries.
pub const PRESENCE_PRUNE_INTERVAL_SECS: u64 = 30;

// =============================================================================
// NARRATION
// =============================================================================

/// Content at or below this many characters with no markdown passes through
/// narration unchanged.
pub const NARRATION_SIMPLE_MAX_LENGTH: usize = 300;

/// Persona used when the caller does not name one.
pub const NARRATION_PERSONA: &str = "adaptive";

/// Status text pushed to the client while narration runs.
pub const NARRATION_STATUS: &str = "Narrating...";

/// Author id shown on the assistant's status indicators.
pub const ASSISTANT_USER_ID: &str = "assistant";

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// WebSocket keepalive ping interval in seconds.
pub const WS_PING_INTERVAL_SECS: u64 = 30;
