//! In-memory presence tracking.
//!
//! A user is present while at least one of their transport sessions is live.
//! Sessions are created on connect or heartbeat and removed on disconnect or
//! when they go stale.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};

use parley_core::{Presence, PresenceTracker};

/// Presence table indexed both by session and by user.
///
/// `sessions` is authoritative; `users` maps a user to the ids of their
/// sessions so liveness queries do not scan every connection.
#[derive(Debug, Default)]
pub struct InMemoryPresence {
    sessions: DashMap<String, Presence>,
    users: DashMap<String, Vec<String>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live sessions of `user_id`.
    pub fn sessions_for(&self, user_id: &str) -> Vec<Presence> {
        let Some(ids) = self.users.get(user_id).map(|ids| ids.clone()) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.sessions.get(id).map(|p| p.clone()))
            .collect()
    }

    /// Number of live sessions across all users.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove sessions whose last heartbeat is older than `max_age`.
    ///
    /// Returns the number of sessions removed.
    pub fn prune_stale(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|p| p.last_seen < cutoff)
            .map(|p| p.session_id.clone())
            .collect();

        for session_id in &stale {
            self.remove_session(session_id);
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), "Pruned stale presence sessions");
        }
        stale.len()
    }

    fn unlink(&self, user_id: &str, session_id: &str) {
        // Drop the user row in the same shard operation that empties it
        self.users.remove_if_mut(user_id, |_, ids| {
            ids.retain(|id| id != session_id);
            ids.is_empty()
        });
    }
}

impl PresenceTracker for InMemoryPresence {
    fn touch(&self, user_id: &str, session_id: &str, status: Option<&str>) {
        let presence = Presence::new(user_id, session_id, status.map(String::from));
        let previous = self.sessions.insert(session_id.to_string(), presence);

        match previous {
            Some(prev) if prev.user_id == user_id => return,
            // Session id reused by another user: move it over
            Some(prev) => self.unlink(&prev.user_id, session_id),
            None => debug!(user_id, session_id, "Presence session opened"),
        }

        let mut ids = self.users.entry(user_id.to_string()).or_default();
        if !ids.iter().any(|id| id == session_id) {
            ids.push(session_id.to_string());
        }
    }

    fn is_user_present(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .map(|ids| ids.iter().any(|id| self.sessions.contains_key(id)))
            .unwrap_or(false)
    }

    fn remove_session(&self, session_id: &str) {
        if let Some((_, presence)) = self.sessions.remove(session_id) {
            self.unlink(&presence.user_id, session_id);
            debug!(
                user_id = %presence.user_id,
                session_id,
                "Presence session removed"
            );
        }
    }
}
