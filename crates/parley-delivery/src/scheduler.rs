//! Delivery with retry until acknowledged.
//!
//! After the initial push, retries are scheduled with a fixed backoff table.
//! Retries stop when:
//! - The client acknowledges receipt
//! - The recipient's presence disappears (they disconnected)
//! - The maximum number of attempts is exhausted

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use parley_core::defaults;
use parley_core::{DeliveredMessage, MessageTransport, OutboundMessage, PresenceTracker};

use crate::timer::{self, ScheduledTask};

/// Configuration for the delivery scheduler.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Delay before each retry, indexed by attempts made so far.
    pub backoff_delays_ms: Vec<u64>,
    /// Total sends allowed per message, initial push included.
    pub max_attempts: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            backoff_delays_ms: defaults::DELIVERY_BACKOFF_MS.to_vec(),
            max_attempts: defaults::DELIVERY_MAX_ATTEMPTS,
        }
    }
}

impl DeliveryConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DELIVERY_MAX_ATTEMPTS` | `5` | Total sends per message |
    /// | `DELIVERY_BACKOFF_MS` | `3000,6000,12000,24000,36000` | Retry delays |
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("DELIVERY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults::DELIVERY_MAX_ATTEMPTS)
            .max(1);

        let backoff_delays_ms = std::env::var("DELIVERY_BACKOFF_MS")
            .ok()
            .and_then(|v| parse_delays(&v))
            .unwrap_or_else(|| defaults::DELIVERY_BACKOFF_MS.to_vec());

        Self {
            backoff_delays_ms,
            max_attempts,
        }
    }

    /// Replace the backoff table. An empty table is ignored.
    pub fn with_backoff_ms(mut self, delays: Vec<u64>) -> Self {
        if !delays.is_empty() {
            self.backoff_delays_ms = delays;
        }
        self
    }

    /// Set the total number of sends per message.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Delay before the retry that follows `attempt` sends-after-the-first.
    ///
    /// Indexes past the table reuse its last entry.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self
            .backoff_delays_ms
            .get(attempt as usize)
            .or_else(|| self.backoff_delays_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

fn parse_delays(raw: &str) -> Option<Vec<u64>> {
    let delays: Option<Vec<u64>> = raw
        .split(',')
        .map(|s| s.trim().parse::<u64>().ok())
        .collect();
    delays.filter(|d| !d.is_empty())
}

/// Counters for the health endpoint.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub sent: AtomicU64,
    pub acknowledged: AtomicU64,
    pub abandoned: AtomicU64,
    pub exhausted: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub sent: u64,
    pub acknowledged: u64,
    pub abandoned: u64,
    pub exhausted: u64,
    pub pending: usize,
}

/// An in-flight delivery, owned by the scheduler until it is acknowledged,
/// abandoned, or exhausted.
#[derive(Debug)]
struct PendingDelivery {
    recipient_id: String,
    message: DeliveredMessage,
    /// Retries fired so far (0 right after the initial send).
    attempt: u32,
    retry: Option<ScheduledTask>,
}

struct SchedulerInner {
    config: DeliveryConfig,
    transport: Arc<dyn MessageTransport>,
    presence: Arc<dyn PresenceTracker>,
    pending: DashMap<String, PendingDelivery>,
    stats: DeliveryStats,
}

/// Pushes messages to users and retries until acknowledged.
///
/// Cheap to clone; all clones share the pending-delivery table.
#[derive(Clone)]
pub struct DeliveryScheduler {
    inner: Arc<SchedulerInner>,
}

impl DeliveryScheduler {
    pub fn new(
        config: DeliveryConfig,
        transport: Arc<dyn MessageTransport>,
        presence: Arc<dyn PresenceTracker>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                transport,
                presence,
                pending: DashMap::new(),
                stats: DeliveryStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.inner.config
    }

    /// Send a message now and schedule retries until acknowledged or abandoned.
    ///
    /// Returns immediately; retries run on background timers. Must be called
    /// from within a tokio runtime.
    pub fn deliver_with_retry(&self, recipient_id: &str, message: DeliveredMessage) {
        let message_id = message.id.clone();
        self.send(recipient_id, &message);

        if self.inner.config.max_attempts <= 1 {
            debug!(message_id = %message_id, recipient_id, "Single-attempt delivery, no retries");
            return;
        }

        let delay = self.inner.config.delay_for(0);
        // Insert before scheduling so the timer always finds its entry.
        self.inner.pending.insert(
            message_id.clone(),
            PendingDelivery {
                recipient_id: recipient_id.to_string(),
                message,
                attempt: 0,
                retry: None,
            },
        );
        let task = self.schedule_retry(message_id.clone(), delay);
        match self.inner.pending.get_mut(&message_id) {
            // A zero delay may already have fired and stored its successor
            Some(mut entry) if entry.retry.is_none() => entry.retry = Some(task),
            Some(_) => {}
            // Acknowledged before the handle could be stored
            None => task.cancel(),
        }
        debug!(
            message_id = %message_id,
            recipient_id,
            delay_ms = delay.as_millis() as u64,
            "Delivery sent, first retry scheduled"
        );
    }

    /// Client acknowledged receipt: cancel any pending retries.
    ///
    /// Returns `true` if a pending delivery was removed. Unknown ids (already
    /// acknowledged, abandoned, or exhausted) are a no-op.
    pub fn acknowledge(&self, message_id: &str) -> bool {
        match self.inner.pending.remove(message_id) {
            Some((_, delivery)) => {
                if let Some(task) = &delivery.retry {
                    task.cancel();
                }
                self.inner.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
                debug!(
                    message_id,
                    recipient_id = %delivery.recipient_id,
                    attempt = delivery.attempt,
                    "Message acknowledged"
                );
                true
            }
            None => {
                debug!(message_id, "Acknowledgment for unknown or finished delivery");
                false
            }
        }
    }

    /// Number of deliveries awaiting acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether `message_id` is still awaiting acknowledgment.
    pub fn is_pending(&self, message_id: &str) -> bool {
        self.inner.pending.contains_key(message_id)
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        let s = &self.inner.stats;
        DeliveryStatsSnapshot {
            sent: s.sent.load(Ordering::Relaxed),
            acknowledged: s.acknowledged.load(Ordering::Relaxed),
            abandoned: s.abandoned.load(Ordering::Relaxed),
            exhausted: s.exhausted.load(Ordering::Relaxed),
            pending: self.pending_count(),
        }
    }

    /// Cancel every scheduled retry and forget all pending deliveries.
    ///
    /// Used on shutdown. Returns how many deliveries were dropped.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.inner.pending.iter().map(|e| e.key().clone()).collect();
        let mut dropped = 0;
        for id in ids {
            if let Some((_, delivery)) = self.inner.pending.remove(&id) {
                if let Some(task) = &delivery.retry {
                    task.cancel();
                }
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!(dropped, "Cancelled pending deliveries");
        }
        dropped
    }

    fn send(&self, recipient_id: &str, message: &DeliveredMessage) {
        self.inner
            .transport
            .send_to_user(recipient_id, OutboundMessage::Messages(message.clone()));
        self.inner.stats.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn schedule_retry(&self, message_id: String, delay: Duration) -> ScheduledTask {
        let scheduler = self.clone();
        timer::schedule(delay, async move {
            scheduler.retry_delivery(&message_id);
        })
    }

    /// One timer firing.
    ///
    /// The entry is only locked to bump the attempt and to store the next
    /// handle. Presence checks and the send run unlocked, so a transport may
    /// call back into the scheduler.
    fn retry_delivery(&self, message_id: &str) {
        let (recipient_id, message, attempt) = {
            let Some(mut entry) = self.inner.pending.get_mut(message_id) else {
                // Already acknowledged
                return;
            };
            entry.attempt += 1;
            (
                entry.recipient_id.clone(),
                entry.message.clone(),
                entry.attempt,
            )
        };

        if attempt >= self.inner.config.max_attempts {
            if self.inner.pending.remove(message_id).is_some() {
                self.inner.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                info!(
                    message_id,
                    recipient_id = %recipient_id,
                    attempt,
                    "Giving up delivery after max attempts"
                );
            }
            return;
        }

        if !self.inner.presence.is_user_present(&recipient_id) {
            if self.inner.pending.remove(message_id).is_some() {
                self.inner.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                info!(
                    message_id,
                    recipient_id = %recipient_id,
                    "Recipient no longer present, abandoning delivery"
                );
            }
            return;
        }

        if !self.is_pending(message_id) {
            return;
        }
        debug!(
            message_id,
            recipient_id = %recipient_id,
            attempt,
            "Retrying delivery"
        );
        self.send(&recipient_id, &message);

        let delay = self.inner.config.delay_for(attempt);
        let task = self.schedule_retry(message_id.to_string(), delay);
        match self.inner.pending.get_mut(message_id) {
            Some(mut entry) => entry.retry = Some(task),
            // Acknowledged during the send
            None => task.cancel(),
        }
    }
}
