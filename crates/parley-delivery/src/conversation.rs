//! Conversation append path.
//!
//! Appending records the message in memory and fires `ADDED` right away; the
//! durable write runs on a background task and fires `PERSISTED` or
//! `PERSISTENCE_FAILED` when it completes. `ADDED` is always queued before
//! the write starts, so it precedes the matching outcome event.
//!
//! Every event goes to the dispatcher over an unbounded queue, then to the
//! broadcast bus for any other observers. Bus subscribers may lag and miss
//! events; the dispatcher never does.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use parley_core::defaults;
use parley_core::{ChatMessage, ConversationEvent, ConversationEventBus, ConversationStore};

/// A message to append, with its routing metadata.
#[derive(Debug, Clone)]
pub struct AppendMessage {
    pub conversation_id: String,
    pub message: ChatMessage,
    pub from_user_id: Option<String>,
    pub to_user_id: Option<String>,
    pub title: Option<String>,
}

impl AppendMessage {
    pub fn new(conversation_id: impl Into<String>, message: ChatMessage) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message,
            from_user_id: None,
            to_user_id: None,
            title: None,
        }
    }

    pub fn from_user(mut self, user_id: impl Into<String>) -> Self {
        self.from_user_id = Some(user_id.into());
        self
    }

    pub fn to_user(mut self, user_id: impl Into<String>) -> Self {
        self.to_user_id = Some(user_id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn event(&self, base: ConversationEvent) -> ConversationEvent {
        let mut event = base;
        event.from_user_id = self.from_user_id.clone();
        event.to_user_id = self.to_user_id.clone();
        event.title = self.title.clone();
        event
    }
}

/// Sends each event to the dispatcher queue, then to the observer bus.
#[derive(Clone)]
struct EventSink {
    dispatch: mpsc::UnboundedSender<ConversationEvent>,
    bus: Arc<ConversationEventBus>,
}

impl EventSink {
    fn publish(&self, event: ConversationEvent) {
        if self.dispatch.send(event.clone()).is_err() {
            warn!(
                conversation_id = %event.conversation_id,
                status = event.status.as_str(),
                "Event dispatcher stopped, event not delivered"
            );
        }
        self.bus.emit(event);
    }
}

/// Appends messages and publishes their lifecycle events.
///
/// The in-memory log keeps at most `log_limit` messages per conversation,
/// dropping the oldest first. It is a recent-history view; the
/// [`ConversationStore`] is the durable record.
pub struct ConversationService {
    sink: EventSink,
    store: Arc<dyn ConversationStore>,
    log: DashMap<String, ConversationLog>,
    log_limit: usize,
}

#[derive(Default)]
struct ConversationLog {
    /// Messages ever appended, including those trimmed from `recent`.
    total: usize,
    recent: VecDeque<ChatMessage>,
}

impl ConversationService {
    pub fn new(
        dispatch: mpsc::UnboundedSender<ConversationEvent>,
        bus: Arc<ConversationEventBus>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            sink: EventSink { dispatch, bus },
            store,
            log: DashMap::new(),
            log_limit: defaults::CONVERSATION_LOG_LIMIT,
        }
    }

    /// Cap the in-memory log per conversation. Zero is treated as one.
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit.max(1);
        self
    }

    /// Append a message and start its durable write.
    ///
    /// Returns the conversation's total message count after the append and the
    /// handle of the background write. Must be called from within a tokio
    /// runtime.
    pub fn append(&self, request: AppendMessage) -> (usize, JoinHandle<()>) {
        let count = {
            let mut log = self.log.entry(request.conversation_id.clone()).or_default();
            log.total += 1;
            log.recent.push_back(request.message.clone());
            while log.recent.len() > self.log_limit {
                log.recent.pop_front();
            }
            log.total
        };

        let added = request.event(ConversationEvent::added(
            request.conversation_id.as_str(),
            request.message.clone(),
        ));
        self.sink.publish(added);

        let sink = self.sink.clone();
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let conversation_id = request.conversation_id.as_str();
            let outcome = match store.persist_message(conversation_id, &request.message).await {
                Ok(()) => {
                    debug!(
                        conversation_id,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Message persisted"
                    );
                    ConversationEvent::persisted(conversation_id, request.message.clone())
                }
                Err(e) => {
                    error!(conversation_id, error = %e, "Message persistence failed");
                    ConversationEvent::persistence_failed(
                        conversation_id,
                        request.message.clone(),
                        e.to_string(),
                    )
                }
            };
            sink.publish(request.event(outcome));
        });

        (count, handle)
    }

    /// Most recent messages of a conversation, oldest first.
    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.log
            .get(conversation_id)
            .map(|log| log.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of conversations with at least one message.
    pub fn conversation_count(&self) -> usize {
        self.log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::MessageStatus;

    use crate::memory::InMemoryConversationStore;

    struct Fixture {
        service: ConversationService,
        bus: Arc<ConversationEventBus>,
        store: Arc<InMemoryConversationStore>,
        queue: mpsc::UnboundedReceiver<ConversationEvent>,
    }

    fn service() -> Fixture {
        let bus = Arc::new(ConversationEventBus::new(32));
        let store = Arc::new(InMemoryConversationStore::new());
        let (tx, queue) = mpsc::unbounded_channel();
        Fixture {
            service: ConversationService::new(tx, bus.clone(), store.clone()),
            bus,
            store,
            queue,
        }
    }

    #[tokio::test]
    async fn test_append_emits_added_then_persisted() {
        let Fixture {
            service,
            bus,
            store,
            mut queue,
        } = service();
        let mut rx = bus.subscribe();

        let (count, handle) = service.append(
            AppendMessage::new("conv-1", ChatMessage::assistant("hi"))
                .from_user("bot")
                .to_user("alice")
                .title("Greetings"),
        );
        assert_eq!(count, 1);
        handle.await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, MessageStatus::Added);
        assert_eq!(first.to_user_id.as_deref(), Some("alice"));
        assert_eq!(first.title.as_deref(), Some("Greetings"));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.status, MessageStatus::Persisted);
        assert_eq!(second.from_user_id.as_deref(), Some("bot"));
        assert_eq!(store.persisted("conv-1").len(), 1);

        // The dispatcher queue sees the same events in the same order
        assert_eq!(queue.recv().await.unwrap().status, MessageStatus::Added);
        assert_eq!(queue.recv().await.unwrap().status, MessageStatus::Persisted);
    }

    #[tokio::test]
    async fn test_append_failure_emits_persistence_failed() {
        let Fixture {
            service,
            bus,
            store,
            ..
        } = service();
        store.set_failing(true);
        let mut rx = bus.subscribe();

        let (_, handle) = service.append(AppendMessage::new("conv-2", ChatMessage::user("q")));
        handle.await.unwrap();

        assert_eq!(rx.recv().await.unwrap().status, MessageStatus::Added);
        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.status, MessageStatus::PersistenceFailed);
        assert!(failed.error.unwrap().contains("store unavailable"));
        // The in-memory log keeps the message regardless
        assert_eq!(service.messages("conv-2").len(), 1);
    }

    #[tokio::test]
    async fn test_append_counts_per_conversation() {
        let Fixture { service, .. } = service();
        service.append(AppendMessage::new("conv-1", ChatMessage::user("a")));
        let (count, _) = service.append(AppendMessage::new("conv-1", ChatMessage::assistant("b")));
        let (other, _) = service.append(AppendMessage::new("conv-2", ChatMessage::user("c")));

        assert_eq!(count, 2);
        assert_eq!(other, 1);
        assert_eq!(service.conversation_count(), 2);
        assert!(service.messages("unknown").is_empty());
    }

    #[tokio::test]
    async fn test_log_keeps_recent_messages_but_counts_all() {
        let Fixture { service, .. } = service();
        let service = service.with_log_limit(2);

        service.append(AppendMessage::new("conv-1", ChatMessage::user("a")));
        service.append(AppendMessage::new("conv-1", ChatMessage::user("b")));
        let (count, _) = service.append(AppendMessage::new("conv-1", ChatMessage::user("c")));

        assert_eq!(count, 3);
        let kept: Vec<_> = service
            .messages("conv-1")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(kept, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_append_survives_stopped_dispatcher() {
        let Fixture {
            service,
            bus,
            queue,
            ..
        } = service();
        drop(queue);
        let mut rx = bus.subscribe();

        let (count, handle) = service.append(AppendMessage::new("conv-1", ChatMessage::user("q")));
        handle.await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(rx.recv().await.unwrap().status, MessageStatus::Added);
        assert_eq!(rx.recv().await.unwrap().status, MessageStatus::Persisted);
    }
}
