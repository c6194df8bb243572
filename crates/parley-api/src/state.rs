//! Shared application state and pipeline wiring.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_core::{ConversationEventBus, ConversationStore, UserDirectory};
use parley_delivery::{
    ConversationService, DeliveryConfig, DeliveryScheduler, EventDispatcher, InMemoryPresence,
    NarrationCache, NarrationModel, Narrator,
};

use crate::config::ApiConfig;
use crate::services::ConnectionHub;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    /// Live WebSocket connections; the transport for every push.
    pub hub: Arc<ConnectionHub>,
    pub presence: Arc<InMemoryPresence>,
    pub scheduler: DeliveryScheduler,
    pub cache: Arc<NarrationCache>,
    pub conversations: Arc<ConversationService>,
    pub narrator: Arc<Narrator>,
    pub users: Arc<dyn UserDirectory>,
    /// Conversation events for observers. The dispatcher has its own queue.
    pub bus: Arc<ConversationEventBus>,
}

/// External collaborators the pipeline is wired to.
pub struct Backends {
    pub store: Arc<dyn ConversationStore>,
    pub users: Arc<dyn UserDirectory>,
    pub model: Arc<dyn NarrationModel>,
}

impl AppState {
    /// Wire the delivery pipeline and start its event dispatcher.
    ///
    /// Returns the state and the dispatcher task handle. Must be called from
    /// within a tokio runtime.
    pub fn build(
        config: ApiConfig,
        delivery: DeliveryConfig,
        backends: Backends,
    ) -> (Self, JoinHandle<()>) {
        let hub = Arc::new(ConnectionHub::new());
        let presence = Arc::new(InMemoryPresence::new());
        let cache = Arc::new(NarrationCache::new());
        let bus = Arc::new(ConversationEventBus::new(config.event_bus_capacity));

        let scheduler = DeliveryScheduler::new(delivery, hub.clone(), presence.clone());

        let dispatcher = EventDispatcher::new(
            cache.clone(),
            scheduler.clone(),
            hub.clone(),
            backends.users.clone(),
            backends.store.clone(),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher_handle = dispatcher.spawn(events_rx);

        let conversations = Arc::new(
            ConversationService::new(events_tx, bus.clone(), backends.store)
                .with_log_limit(config.conversation_log_limit),
        );
        let narrator = Arc::new(
            Narrator::new(
                backends.model,
                cache.clone(),
                hub.clone(),
                config.assistant_user_id.as_str(),
            )
            .with_default_persona(config.narration_persona.as_str()),
        );

        let state = Self {
            config: Arc::new(config),
            hub,
            presence,
            scheduler,
            cache,
            conversations,
            narrator,
            users: backends.users,
            bus,
        };
        (state, dispatcher_handle)
    }
}
