//! QZRelay - Local-network broadcast relay
//!
//! This library provides a small TCP relay for unrouted local networks:
//! it advertises itself for peer discovery over UDP multicast, accepts
//! peer connections, and broadcasts outbound text messages to all of them.

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod util;

pub use config::Config;
pub use error::RelayError;
pub use relay::RelayServer;

/// Server version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
