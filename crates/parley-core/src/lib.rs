//! # parley-core
//!
//! Core types, traits, and abstractions for parley.
//!
//! This crate provides the data structures, wire payloads, and collaborator
//! trait definitions that the other parley crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::ConversationEventBus;
pub use models::*;
pub use traits::*;
pub use uuid_utils::{new_id, new_v7};
