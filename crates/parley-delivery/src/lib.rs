//! # parley-delivery
//!
//! Delivery and enrichment pipeline for parley.
//!
//! This crate provides:
//! - A narration cache shared by the narrator and the dispatcher
//! - A delivery scheduler that retries pushes until acknowledged
//! - An event dispatcher reacting to conversation lifecycle events
//! - The narrator that produces speech-friendly text
//! - In-memory presence, store, and directory implementations
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use parley_core::ConversationEventBus;
//! use parley_delivery::{
//!     ConversationService, DeliveryConfig, DeliveryScheduler, EventDispatcher, NarrationCache,
//! };
//!
//! let bus = Arc::new(ConversationEventBus::default());
//! let cache = Arc::new(NarrationCache::new());
//! let scheduler = DeliveryScheduler::new(DeliveryConfig::from_env(), transport.clone(), presence);
//! let dispatcher = EventDispatcher::new(cache, scheduler, transport, users, store.clone());
//! let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
//! dispatcher.spawn(events_rx);
//! let conversations = ConversationService::new(events_tx, bus, store);
//! ```

pub mod conversation;
pub mod dispatcher;
pub mod memory;
pub mod narration_cache;
pub mod narrator;
pub mod presence;
pub mod scheduler;
pub mod timer;

pub use conversation::{AppendMessage, ConversationService};
pub use dispatcher::EventDispatcher;
pub use memory::{InMemoryConversationStore, InMemoryUserDirectory};
pub use narration_cache::NarrationCache;
pub use narrator::{
    classify, target_words, NarrationCategory, NarrationModel, NarrationRequest, Narrator,
    PlainTextModel,
};
pub use presence::InMemoryPresence;
pub use scheduler::{DeliveryConfig, DeliveryScheduler, DeliveryStatsSnapshot};
pub use timer::{schedule, ScheduledTask};
