//! Periodic background maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use parley_delivery::InMemoryPresence;

/// Periodically drop presence sessions that stopped sending heartbeats.
///
/// Deliveries to users whose last session is pruned are abandoned at their
/// next retry.
pub fn spawn_presence_pruner(
    presence: Arc<InMemoryPresence>,
    ttl: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = presence.prune_stale(ttl);
            debug!(removed, remaining = presence.session_count(), "Presence sweep");
        }
    })
}
