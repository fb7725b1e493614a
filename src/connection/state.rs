//! Connection state

use std::net::SocketAddr;
use std::time::Instant;

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Create from raw u64
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Connection lifecycle phase
///
/// `Failed` and `Cancelled` are terminal; a connection in either phase
/// accepts no further outbound work and delivers no further messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Connection accepted, not yet configured
    Setup,
    /// Transport configured, handshake in progress
    Preparing,
    /// Connection is active and accepting messages
    Ready,
    /// Connection errored (I/O, decode, or queue overflow)
    Failed,
    /// Connection closed deliberately (peer EOF or server shutdown)
    Cancelled,
}

impl ConnectionPhase {
    /// Whether this phase accepts no further work
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionPhase::Failed | ConnectionPhase::Cancelled)
    }
}

/// Per-connection bookkeeping
#[derive(Debug)]
pub struct ConnectionState {
    /// Unique identifier
    pub id: ConnectionId,
    /// Peer address
    pub peer_addr: SocketAddr,
    /// Lifecycle phase
    pub phase: ConnectionPhase,
    /// Connection start time
    pub connected_at: Instant,
    /// Messages queued for transmission
    pub msgs_queued: u64,
    /// Messages received from the peer
    pub msgs_received: u64,
    /// Bytes sent
    pub bytes_tx: u64,
    /// Bytes received
    pub bytes_rx: u64,
}

impl ConnectionState {
    /// Create new connection state in the `Setup` phase
    pub fn new(id: ConnectionId, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: ConnectionPhase::Setup,
            connected_at: Instant::now(),
            msgs_queued: 0,
            msgs_received: 0,
            bytes_tx: 0,
            bytes_rx: 0,
        }
    }

    /// Record an outbound message queued for this peer
    pub fn record_queued(&mut self, bytes: u64) {
        self.msgs_queued = self.msgs_queued.saturating_add(1);
        self.bytes_tx = self.bytes_tx.saturating_add(bytes);
    }

    /// Record an inbound message decoded from this peer
    pub fn record_received(&mut self, bytes: u64) {
        self.msgs_received = self.msgs_received.saturating_add(1);
        self.bytes_rx = self.bytes_rx.saturating_add(bytes);
    }

    /// Get connection duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(ConnectionPhase::Failed.is_terminal());
        assert!(ConnectionPhase::Cancelled.is_terminal());
        assert!(!ConnectionPhase::Ready.is_terminal());
        assert!(!ConnectionPhase::Preparing.is_terminal());
    }

    #[test]
    fn test_display_is_hex() {
        let id = ConnectionId::from_raw(255);
        assert_eq!(format!("{}", id), "00000000000000ff");
    }
}
