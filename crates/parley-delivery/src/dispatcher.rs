//! Conversation event dispatch.
//!
//! Reacts to the three lifecycle events of a message:
//! - `ADDED`: push to the recipient with the cached narration attached
//! - `PERSISTED`: move the cached narration into the durable store
//! - `PERSISTENCE_FAILED`: drop the cached narration
//!
//! Handlers are independent and never propagate errors to the event producer.
//!
//! Events arrive on an unbounded queue fed by [`ConversationService`], so a
//! slow store or directory delays delivery but never drops an event.
//!
//! [`ConversationService`]: crate::conversation::ConversationService

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use parley_core::{
    new_id, ChatMessage, ConversationEvent, ConversationStore, DeliveredMessage, MessageStatus,
    MessageTransport, OutboundMessage, SessionEvent, StatusMessage, UserDirectory,
};

use crate::narration_cache::NarrationCache;
use crate::scheduler::DeliveryScheduler;

/// Routes conversation events to the cache, scheduler, and store.
#[derive(Clone)]
pub struct EventDispatcher {
    cache: Arc<NarrationCache>,
    scheduler: DeliveryScheduler,
    transport: Arc<dyn MessageTransport>,
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn ConversationStore>,
}

impl EventDispatcher {
    pub fn new(
        cache: Arc<NarrationCache>,
        scheduler: DeliveryScheduler,
        transport: Arc<dyn MessageTransport>,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            cache,
            scheduler,
            transport,
            users,
            store,
        }
    }

    /// Handle one event.
    pub async fn dispatch(&self, event: ConversationEvent) {
        match event.status {
            MessageStatus::Added => self.on_added(&event).await,
            MessageStatus::Persisted => self.on_persisted(&event).await,
            MessageStatus::PersistenceFailed => self.on_persistence_failed(&event),
        }
    }

    /// Drain `events` in order until every sender is dropped.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ConversationEvent>) {
        info!("Event dispatcher started");
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        info!("Conversation event queue closed, dispatcher stopping");
    }

    /// Run the dispatch loop on a background task.
    pub fn spawn(self, events: mpsc::UnboundedReceiver<ConversationEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn on_added(&self, event: &ConversationEvent) {
        let conversation_id = event.conversation_id.as_str();
        let (Some(to_user_id), Some(message)) = (event.to_user_id.as_deref(), &event.message)
        else {
            debug!(
                conversation_id,
                "ADDED without recipient or payload, nothing to deliver"
            );
            return;
        };

        let Some(recipient_id) = self.resolve(conversation_id, to_user_id).await else {
            return;
        };

        let delivered = self.build_delivered(event, message);
        debug!(
            conversation_id,
            message_id = %delivered.id,
            user_id = %recipient_id,
            has_narration = delivered.narration.is_some(),
            "Delivering message"
        );

        if event.title.is_some() {
            self.send_session_event(&recipient_id, event);
        }

        self.scheduler.deliver_with_retry(&recipient_id, delivered);

        if let Some(from_user_id) = event.from_user_id.as_deref() {
            self.transport.send_to_user(
                &recipient_id,
                OutboundMessage::Status(StatusMessage::clear(from_user_id)),
            );
        }
    }

    async fn on_persisted(&self, event: &ConversationEvent) {
        let conversation_id = event.conversation_id.as_str();

        if let (Some(_), Some(to_user_id)) = (&event.title, event.to_user_id.as_deref()) {
            if let Some(recipient_id) = self.resolve(conversation_id, to_user_id).await {
                self.send_session_event(&recipient_id, event);
            }
        }

        let Some(narration) = self.cache.consume(conversation_id) else {
            debug!(conversation_id, "No cached narration to persist");
            return;
        };

        match self
            .store
            .update_message_narration(conversation_id, &narration)
            .await
        {
            Ok(()) => debug!(
                conversation_id,
                narration_len = narration.len(),
                "Narration persisted"
            ),
            Err(e) => error!(
                conversation_id,
                error = %e,
                "Failed to persist narration"
            ),
        }
    }

    fn on_persistence_failed(&self, event: &ConversationEvent) {
        let conversation_id = event.conversation_id.as_str();
        error!(
            conversation_id,
            error = event.error.as_deref().unwrap_or("unknown"),
            "Message persistence failed"
        );
        if self.cache.consume(conversation_id).is_some() {
            debug!(conversation_id, "Discarded cached narration");
        }
    }

    /// Routing id of a participant. Missing or failing lookups skip delivery.
    async fn resolve(&self, conversation_id: &str, user_id: &str) -> Option<String> {
        match self.users.resolve_delivery_id(user_id).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                warn!(conversation_id, user_id, "Recipient has no delivery id, skipping");
                None
            }
            Err(e) => {
                warn!(
                    conversation_id,
                    user_id,
                    error = %e,
                    "Recipient lookup failed, skipping"
                );
                None
            }
        }
    }

    fn build_delivered(&self, event: &ConversationEvent, message: &ChatMessage) -> DeliveredMessage {
        DeliveredMessage {
            id: new_id(),
            session_id: event.conversation_id.clone(),
            role: message.role.as_str().to_string(),
            body: message.content.clone(),
            ts: event.timestamp,
            author_id: event.from_user_id.clone(),
            title: event.title.clone(),
            narration: self.cache.peek(&event.conversation_id),
        }
    }

    fn send_session_event(&self, recipient_id: &str, event: &ConversationEvent) {
        self.transport.send_to_user(
            recipient_id,
            OutboundMessage::Session(SessionEvent::created(
                event.conversation_id.as_str(),
                event.title.clone(),
            )),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use parley_core::{Error, PresenceTracker, Result};

    use crate::memory::{InMemoryConversationStore, InMemoryUserDirectory};
    use crate::presence::InMemoryPresence;
    use crate::scheduler::DeliveryConfig;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, OutboundMessage)>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(String, OutboundMessage)> {
            self.sent.lock().unwrap().clone()
        }

        fn delivered(&self) -> Vec<DeliveredMessage> {
            self.sent()
                .into_iter()
                .filter_map(|(_, m)| match m {
                    OutboundMessage::Messages(d) => Some(d),
                    _ => None,
                })
                .collect()
        }
    }

    impl MessageTransport for RecordingTransport {
        fn send_to_user(&self, user_id: &str, payload: OutboundMessage) {
            self.sent
                .lock()
                .unwrap()
                .push((user_id.to_string(), payload));
        }
    }

    struct FailingDirectory;

    #[async_trait]
    impl UserDirectory for FailingDirectory {
        async fn resolve_delivery_id(&self, _user_id: &str) -> Result<Option<String>> {
            Err(Error::NotFound("directory offline".to_string()))
        }
    }

    struct Harness {
        cache: Arc<NarrationCache>,
        transport: Arc<RecordingTransport>,
        store: Arc<InMemoryConversationStore>,
        scheduler: DeliveryScheduler,
        dispatcher: EventDispatcher,
    }

    fn harness_with(users: Arc<dyn UserDirectory>, store: Arc<InMemoryConversationStore>) -> Harness {
        let cache = Arc::new(NarrationCache::new());
        let transport = Arc::new(RecordingTransport::default());
        let presence = Arc::new(InMemoryPresence::new());
        presence.touch("alice-route", "s-1", None);
        let scheduler = DeliveryScheduler::new(
            DeliveryConfig::default(),
            transport.clone(),
            presence,
        );
        let dispatcher = EventDispatcher::new(
            cache.clone(),
            scheduler.clone(),
            transport.clone(),
            users,
            store.clone(),
        );
        Harness {
            cache,
            transport,
            store,
            scheduler,
            dispatcher,
        }
    }

    fn harness() -> Harness {
        let users = Arc::new(InMemoryUserDirectory::new());
        users.insert("alice", "alice-route");
        harness_with(users, Arc::new(InMemoryConversationStore::new()))
    }

    fn added(conversation_id: &str) -> ConversationEvent {
        ConversationEvent::added(conversation_id, ChatMessage::assistant("Hello there"))
            .with_from_user("bot")
            .with_to_user("alice")
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_attaches_cached_narration() {
        let h = harness();
        h.cache.put("conv-1", "hello narration");

        h.dispatcher.dispatch(added("conv-1")).await;

        let delivered = h.transport.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].narration.as_deref(), Some("hello narration"));
        assert_eq!(delivered[0].session_id, "conv-1");
        assert_eq!(delivered[0].role, "assistant");
        assert_eq!(delivered[0].author_id.as_deref(), Some("bot"));
        // Delivery must not remove the entry
        assert_eq!(h.cache.peek("conv-1").as_deref(), Some("hello narration"));
        assert_eq!(h.scheduler.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_without_narration() {
        let h = harness();
        h.dispatcher.dispatch(added("conv-1")).await;

        let delivered = h.transport.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].narration.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_routes_and_clears_status() {
        let h = harness();
        h.dispatcher.dispatch(added("conv-1")).await;

        let sent = h.transport.sent();
        assert!(sent.iter().all(|(to, _)| to == "alice-route"));
        let last = sent.last().unwrap();
        match &last.1 {
            OutboundMessage::Status(s) => {
                assert_eq!(s.from_user_id, "bot");
                assert!(s.status.is_none());
            }
            other => panic!("expected status clear, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_without_sender_sends_no_status() {
        let h = harness();
        let event = ConversationEvent::added("conv-1", ChatMessage::assistant("hi"))
            .with_to_user("alice");
        h.dispatcher.dispatch(event).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.destination(), "messages");
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_with_title_sends_session_event_first() {
        let h = harness();
        h.dispatcher
            .dispatch(added("conv-1").with_title("Trip planning"))
            .await;

        let destinations: Vec<_> = h
            .transport
            .sent()
            .iter()
            .map(|(_, m)| m.destination())
            .collect();
        assert_eq!(destinations, vec!["session", "messages", "status"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_skips_missing_recipient_or_payload() {
        let h = harness();
        let no_recipient = ConversationEvent::added("conv-1", ChatMessage::assistant("hi"));
        let no_payload = added("conv-1").without_message();

        h.dispatcher.dispatch(no_recipient).await;
        h.dispatcher.dispatch(no_payload).await;

        assert!(h.transport.sent().is_empty());
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_skips_unresolvable_recipient() {
        let h = harness();
        let event = ConversationEvent::added("conv-1", ChatMessage::assistant("hi"))
            .with_to_user("stranger");
        h.dispatcher.dispatch(event).await;
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_skips_on_lookup_error() {
        let h = harness_with(
            Arc::new(FailingDirectory),
            Arc::new(InMemoryConversationStore::new()),
        );
        h.dispatcher.dispatch(added("conv-1")).await;
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_moves_narration_to_store() {
        let h = harness();
        let message = ChatMessage::assistant("Hello there");
        h.store.persist_message("conv-1", &message).await.unwrap();
        h.cache.put("conv-1", "hello narration");

        h.dispatcher
            .dispatch(ConversationEvent::persisted("conv-1", message))
            .await;

        assert!(h.cache.peek("conv-1").is_none());
        assert_eq!(
            h.store.narration_for("conv-1").as_deref(),
            Some("hello narration")
        );
    }

    #[tokio::test]
    async fn test_persisted_without_narration_is_noop() {
        let h = harness();
        h.dispatcher
            .dispatch(ConversationEvent::persisted("conv-1", ChatMessage::user("q")))
            .await;
        assert!(h.store.narration_for("conv-1").is_none());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_store_failure_still_consumes() {
        let h = harness();
        h.store.set_failing(true);
        h.cache.put("conv-1", "text");

        h.dispatcher
            .dispatch(ConversationEvent::persisted(
                "conv-1",
                ChatMessage::assistant("x"),
            ))
            .await;

        assert!(h.cache.is_empty());
        assert!(h.store.narration_for("conv-1").is_none());
    }

    #[tokio::test]
    async fn test_persisted_with_title_sends_session_event() {
        let h = harness();
        h.dispatcher
            .dispatch(
                ConversationEvent::persisted("conv-1", ChatMessage::assistant("x"))
                    .with_to_user("alice")
                    .with_title("Renamed"),
            )
            .await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            OutboundMessage::Session(s) => {
                assert_eq!(s.session_id, "conv-1");
                assert_eq!(s.title.as_deref(), Some("Renamed"));
            }
            other => panic!("expected session event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_persistence_failed_discards_narration() {
        let h = harness();
        h.cache.put("conv-2", "x");

        h.dispatcher
            .dispatch(ConversationEvent::persistence_failed(
                "conv-2",
                ChatMessage::assistant("x"),
                "disk full",
            ))
            .await;

        assert!(h.cache.peek("conv-2").is_none());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_queue_closes() {
        let h = harness();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = h.dispatcher.clone().spawn(rx);

        tx.send(added("conv-1")).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(h.transport.delivered().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_handles_burst_without_loss() {
        let h = harness();
        let (tx, rx) = mpsc::unbounded_channel();

        // Queue far more events than any broadcast capacity before the loop starts
        for i in 0..1_000 {
            let id = format!("conv-{i}");
            h.cache.put(&id, "narration");
            tx.send(added(&id)).unwrap();
            tx.send(ConversationEvent::persisted(&id, ChatMessage::assistant("x")))
                .unwrap();
        }
        drop(tx);
        h.dispatcher.clone().spawn(rx).await.unwrap();

        let delivered = h.transport.delivered();
        assert_eq!(delivered.len(), 1_000);
        assert!(delivered
            .iter()
            .all(|d| d.narration.as_deref() == Some("narration")));
        assert!(h.cache.is_empty());
        h.scheduler.cancel_all();
    }
}
