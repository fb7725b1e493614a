//! Relay server
//!
//! Owns the listening endpoint, the connection registry, and the
//! discovery advertiser.

mod acceptor;
mod listener;

pub use listener::{InboundMessage, ListenerPhase, RelayServer};
