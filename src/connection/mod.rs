//! Connection management
//!
//! Handles connection state, lifecycle, and tracking.

mod registry;
mod state;

pub use registry::{ConnectionRegistry, PeerHandle, PeerRegistration};
pub use state::{ConnectionId, ConnectionPhase, ConnectionState};
