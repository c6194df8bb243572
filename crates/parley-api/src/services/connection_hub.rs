//! Registry of live WebSocket connections, keyed by user.
//!
//! Each connection owns an unbounded channel drained by its socket writer
//! task. Pushing never blocks the caller; a message for a user with no live
//! connection is dropped and left to the delivery scheduler's retries.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use parley_core::{MessageTransport, OutboundMessage};

struct Connection {
    session_id: String,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

#[derive(Default)]
pub struct ConnectionHub {
    users: DashMap<String, Vec<Connection>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiving end of its outbox.
    pub fn register(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.users
            .entry(user_id.to_string())
            .or_default()
            .push(Connection {
                session_id: session_id.to_string(),
                tx,
            });
        debug!(user_id, session_id, "Connection registered");
        rx
    }

    pub fn unregister(&self, user_id: &str, session_id: &str) {
        self.users.remove_if_mut(user_id, |_, conns| {
            conns.retain(|c| c.session_id != session_id);
            conns.is_empty()
        });
        debug!(user_id, session_id, "Connection unregistered");
    }

    /// Total live connections across all users.
    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }
}

impl MessageTransport for ConnectionHub {
    fn send_to_user(&self, user_id: &str, payload: OutboundMessage) {
        let destination = payload.destination();
        let remaining = {
            let Some(mut conns) = self.users.get_mut(user_id) else {
                debug!(user_id, destination, "No live connection, message dropped");
                return;
            };
            // Writers that already exited are pruned here
            conns.retain(|c| c.tx.send(payload.clone()).is_ok());
            conns.len()
        };
        if remaining == 0 {
            self.users.remove_if(user_id, |_, conns| conns.is_empty());
        }
        debug!(
            user_id,
            destination,
            connections = remaining,
            "Pushed to user"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{SessionEvent, StatusMessage};

    #[test]
    fn test_push_reaches_every_connection_of_user() {
        let hub = ConnectionHub::new();
        let mut a = hub.register("alice", "s-1");
        let mut b = hub.register("alice", "s-2");
        let mut other = hub.register("bob", "s-3");

        hub.send_to_user(
            "alice",
            OutboundMessage::Session(SessionEvent::created("conv-1", None)),
        );

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
        assert!(other.try_recv().is_err());
        assert_eq!(hub.connection_count(), 3);
    }

    #[test]
    fn test_unregister_last_connection_removes_user() {
        let hub = ConnectionHub::new();
        let _rx = hub.register("alice", "s-1");
        hub.unregister("alice", "s-1");
        assert!(!hub.is_connected("alice"));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_closed_receivers_are_pruned() {
        let hub = ConnectionHub::new();
        let rx = hub.register("alice", "s-1");
        let mut live = hub.register("alice", "s-2");
        drop(rx);

        hub.send_to_user("alice", OutboundMessage::Status(StatusMessage::clear("bot")));
        assert_eq!(hub.connection_count(), 1);
        assert!(live.try_recv().is_ok());
    }

    #[test]
    fn test_send_to_unknown_user_is_noop() {
        let hub = ConnectionHub::new();
        hub.send_to_user("ghost", OutboundMessage::Status(StatusMessage::clear("bot")));
        assert_eq!(hub.connection_count(), 0);
    }
}
