//! Service layer for the server.

pub mod connection_hub;
pub mod maintenance;

pub use connection_hub::ConnectionHub;
pub use maintenance::spawn_presence_pruner;
