//! HTTP and WebSocket handlers for parley-api.

pub mod health;
pub mod messages;
pub mod ws;

pub use health::health_check;
pub use messages::post_message;
pub use ws::ws_handler;
