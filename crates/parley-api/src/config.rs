//! Server configuration.

use std::time::Duration;

use parley_core::defaults;

/// Runtime settings for the API server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub event_bus_capacity: usize,
    /// Recent messages kept in memory per conversation.
    pub conversation_log_limit: usize,
    /// Presence sessions not seen for this long are pruned.
    pub presence_ttl: Duration,
    pub presence_prune_interval: Duration,
    pub ws_ping_interval: Duration,
    pub narration_persona: String,
    pub assistant_user_id: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
            event_bus_capacity: defaults::EVENT_BUS_CAPACITY,
            conversation_log_limit: defaults::CONVERSATION_LOG_LIMIT,
            presence_ttl: Duration::from_secs(defaults::PRESENCE_TTL_SECS),
            presence_prune_interval: Duration::from_secs(defaults::PRESENCE_PRUNE_INTERVAL_SECS),
            ws_ping_interval: Duration::from_secs(defaults::WS_PING_INTERVAL_SECS),
            narration_persona: defaults::NARRATION_PERSONA.to_string(),
            assistant_user_id: defaults::ASSISTANT_USER_ID.to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `3000` |
    /// | `EVENT_BUS_CAPACITY` | `256` |
    /// | `CONVERSATION_LOG_LIMIT` | `200` |
    /// | `PRESENCE_TTL_SECS` | `90` |
    /// | `NARRATION_PERSONA` | `adaptive` |
    /// | `ASSISTANT_USER_ID` | `assistant` |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(base.host),
            port: env_parse("PORT").unwrap_or(base.port),
            event_bus_capacity: env_parse::<usize>("EVENT_BUS_CAPACITY")
                .filter(|c| *c > 0)
                .unwrap_or(base.event_bus_capacity),
            conversation_log_limit: env_parse::<usize>("CONVERSATION_LOG_LIMIT")
                .filter(|l| *l > 0)
                .unwrap_or(base.conversation_log_limit),
            presence_ttl: env_parse("PRESENCE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.presence_ttl),
            presence_prune_interval: base.presence_prune_interval,
            ws_ping_interval: base.ws_ping_interval,
            narration_persona: std::env::var("NARRATION_PERSONA")
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or(base.narration_persona),
            assistant_user_id: std::env::var("ASSISTANT_USER_ID")
                .ok()
                .filter(|id| !id.is_empty())
                .unwrap_or(base.assistant_user_id),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
