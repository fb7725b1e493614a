//! Connection registry
//!
//! Tracks all live peer connections and fans broadcasts out to them.
//! Terminal connections are removed eagerly, so the set never holds an
//! entry whose transport has been reaped.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::state::{ConnectionId, ConnectionPhase, ConnectionState};
use crate::protocol;

/// Result of attempting to queue a frame on one peer
pub(crate) enum EnqueueOutcome {
    /// Frame accepted into the outbound queue
    Queued,
    /// Peer not in the `Ready` phase; frame dropped silently
    NotReady,
    /// Peer is dead (queue overflow or writer gone); entry should be reaped
    Dead,
}

/// Broadcast-facing handle for one peer connection
///
/// Holds the sending half of the peer's bounded outbound queue plus the
/// shared lifecycle state. `send` never blocks and never errors: messages
/// to a peer that is not `Ready` are dropped, and a full queue fails the
/// connection rather than growing without bound.
#[derive(Clone)]
pub struct PeerHandle {
    /// Unique identifier
    pub id: ConnectionId,
    tx: mpsc::Sender<Bytes>,
    cancel: Arc<watch::Sender<bool>>,
    state: Arc<Mutex<ConnectionState>>,
}

impl PeerHandle {
    /// Current lifecycle phase
    pub fn phase(&self) -> ConnectionPhase {
        self.state.lock().phase
    }

    /// Peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.state.lock().peer_addr
    }

    /// Queue a text message for this peer
    ///
    /// No-op unless the connection is `Ready`. Never blocks the caller.
    pub fn send(&self, text: &str) {
        let _ = self.enqueue(protocol::encode_message(text));
    }

    /// Record an inbound message decoded from this peer
    pub(crate) fn record_received(&self, bytes: u64) {
        self.state.lock().record_received(bytes);
    }

    pub(crate) fn enqueue(&self, frame: Bytes) -> EnqueueOutcome {
        if self.phase() != ConnectionPhase::Ready {
            return EnqueueOutcome::NotReady;
        }

        let len = frame.len() as u64;
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.state.lock().record_queued(len);
                EnqueueOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "Outbound queue full, failing connection");
                self.transition(ConnectionPhase::Failed);
                EnqueueOutcome::Dead
            }
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Dead,
        }
    }

    /// Move to `phase`; terminal phases are sticky and also fire the
    /// cancellation signal so the connection's tasks wind down.
    pub(crate) fn transition(&self, phase: ConnectionPhase) {
        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = phase;
        }
        if phase.is_terminal() {
            let _ = self.cancel.send(true);
        }
    }

    fn duration_secs(&self) -> f64 {
        self.state.lock().duration().as_secs_f64()
    }
}

/// Everything a connection handler needs to drive one registered peer
pub struct PeerRegistration {
    /// The registered handle, also held in the registry
    pub handle: PeerHandle,
    /// Receiving half of the peer's outbound queue
    pub outbound: mpsc::Receiver<Bytes>,
    /// Fires when the connection reaches a terminal phase
    pub cancelled: watch::Receiver<bool>,
}

/// Tracks all active peer connections
pub struct ConnectionRegistry {
    peers: DashMap<ConnectionId, PeerHandle>,
    next_id: AtomicU64,
    max_connections: usize,
    send_queue_depth: usize,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionRegistry {
    /// Create a new registry
    pub fn new(max_connections: usize, send_queue_depth: usize) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            peers: DashMap::with_capacity(max_connections),
            next_id: AtomicU64::new(1),
            max_connections,
            send_queue_depth,
            shutdown_tx,
        })
    }

    /// Register a new connection in the `Setup` phase
    ///
    /// Returns `None` when the registry is at capacity.
    pub fn register(&self, peer_addr: SocketAddr) -> Option<PeerRegistration> {
        if self.peers.len() >= self.max_connections {
            warn!(%peer_addr, "Connection rejected: at capacity");
            return None;
        }

        let id = ConnectionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, outbound) = mpsc::channel(self.send_queue_depth);
        let (cancel_tx, cancelled) = watch::channel(false);

        let handle = PeerHandle {
            id,
            tx,
            cancel: Arc::new(cancel_tx),
            state: Arc::new(Mutex::new(ConnectionState::new(id, peer_addr))),
        };

        self.peers.insert(id, handle.clone());
        info!(conn_id = %id, %peer_addr, "Peer connected");

        Some(PeerRegistration {
            handle,
            outbound,
            cancelled,
        })
    }

    /// Mark a connection's transport as configured (`Setup` → `Preparing`)
    pub fn set_preparing(&self, id: ConnectionId) {
        if let Some(handle) = self.peers.get(&id) {
            handle.transition(ConnectionPhase::Preparing);
        }
    }

    /// Mark a connection ready for traffic (`Preparing` → `Ready`)
    pub fn activate(&self, id: ConnectionId) {
        if let Some(handle) = self.peers.get(&id) {
            handle.transition(ConnectionPhase::Ready);
            debug!(conn_id = %id, "Connection ready");
        }
    }

    /// Look up a peer handle
    pub fn get(&self, id: ConnectionId) -> Option<PeerHandle> {
        self.peers.get(&id).map(|entry| entry.value().clone())
    }

    /// Remove a connection, transitioning it to the given terminal phase
    ///
    /// Idempotent; safe to call from the handler and the broadcast path
    /// concurrently.
    pub fn remove(&self, id: ConnectionId, phase: ConnectionPhase) {
        debug_assert!(phase.is_terminal());
        if let Some((_, handle)) = self.peers.remove(&id) {
            handle.transition(phase);
            info!(
                conn_id = %id,
                peer_addr = %handle.peer_addr(),
                duration_secs = handle.duration_secs(),
                ?phase,
                "Peer disconnected"
            );
        }
    }

    /// Queue `text` to every `Ready` peer
    ///
    /// The frame is encoded once and queued immediately; no write is
    /// awaited. Peers found dead along the way are reaped. Returns the
    /// number of peers the message was queued to; an empty set is fine.
    pub fn broadcast(&self, text: &str) -> usize {
        let frame = protocol::encode_message(text);
        let mut queued = 0;
        let mut dead = Vec::new();

        for entry in self.peers.iter() {
            match entry.value().enqueue(frame.clone()) {
                EnqueueOutcome::Queued => queued += 1,
                EnqueueOutcome::NotReady => {}
                EnqueueOutcome::Dead => dead.push(entry.value().id),
            }
        }

        // Reap outside the iteration to avoid holding shard locks
        for id in dead {
            self.remove(id, ConnectionPhase::Failed);
        }

        debug!(queued, "Broadcast queued");
        queued
    }

    /// Get current connection count
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Get shutdown receiver
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Cancel every registered connection and signal shutdown; idempotent
    pub fn shutdown_all(&self) {
        let _ = self.shutdown_tx.send(());

        let ids: Vec<ConnectionId> = self.peers.iter().map(|entry| entry.value().id).collect();
        for id in ids {
            self.remove(id, ConnectionPhase::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_connection_lifecycle() {
        let registry = ConnectionRegistry::new(16, 8);
        let reg = registry.register(addr(1000)).unwrap();
        let id = reg.handle.id;

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(reg.handle.phase(), ConnectionPhase::Setup);

        registry.set_preparing(id);
        registry.activate(id);
        assert_eq!(reg.handle.phase(), ConnectionPhase::Ready);

        registry.remove(id, ConnectionPhase::Cancelled);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(reg.handle.phase(), ConnectionPhase::Cancelled);
    }

    #[test]
    fn test_capacity_limit() {
        let registry = ConnectionRegistry::new(1, 8);
        let _first = registry.register(addr(1000)).unwrap();
        assert!(registry.register(addr(1001)).is_none());
    }

    #[test]
    fn test_broadcast_reaches_only_ready_peers() {
        let registry = ConnectionRegistry::new(16, 8);
        let mut ready = registry.register(addr(1000)).unwrap();
        let mut preparing = registry.register(addr(1001)).unwrap();

        registry.set_preparing(ready.handle.id);
        registry.activate(ready.handle.id);
        registry.set_preparing(preparing.handle.id);

        assert_eq!(registry.broadcast("ping"), 1);

        let frame = ready.outbound.try_recv().unwrap();
        let mut decoder = protocol::FrameDecoder::new(1024);
        decoder.feed(&frame);
        assert_eq!(decoder.next_message().unwrap(), Some("ping".to_string()));

        assert!(preparing.outbound.try_recv().is_err());
    }

    #[test]
    fn test_send_on_terminal_connection_is_noop() {
        let registry = ConnectionRegistry::new(16, 8);
        let mut reg = registry.register(addr(1000)).unwrap();
        let id = reg.handle.id;

        registry.activate(id);
        registry.remove(id, ConnectionPhase::Failed);

        reg.handle.send("dropped");
        assert!(reg.outbound.try_recv().is_err());
        assert_eq!(reg.handle.phase(), ConnectionPhase::Failed);
    }

    #[test]
    fn test_send_while_preparing_drops_message() {
        let registry = ConnectionRegistry::new(16, 8);
        let mut reg = registry.register(addr(1000)).unwrap();
        registry.set_preparing(reg.handle.id);

        reg.handle.send("too early");
        assert!(reg.outbound.try_recv().is_err());
    }

    #[test]
    fn test_queue_overflow_fails_connection() {
        let registry = ConnectionRegistry::new(16, 1);
        let reg = registry.register(addr(1000)).unwrap();
        let id = reg.handle.id;
        registry.activate(id);

        assert_eq!(registry.broadcast("fills the queue"), 1);
        // Queue depth is 1 and nothing drains it; next broadcast overflows
        assert_eq!(registry.broadcast("overflows"), 0);

        assert_eq!(reg.handle.phase(), ConnectionPhase::Failed);
        assert_eq!(registry.connection_count(), 0);
        assert!(*reg.cancelled.borrow());
    }

    #[test]
    fn test_broadcast_on_empty_set_is_fine() {
        let registry = ConnectionRegistry::new(16, 8);
        assert_eq!(registry.broadcast("nobody home"), 0);
    }

    #[test]
    fn test_shutdown_all_is_idempotent() {
        let registry = ConnectionRegistry::new(16, 8);
        let reg = registry.register(addr(1000)).unwrap();
        registry.activate(reg.handle.id);

        registry.shutdown_all();
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(reg.handle.phase(), ConnectionPhase::Cancelled);

        registry.shutdown_all();
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(reg.handle.phase(), ConnectionPhase::Cancelled);
    }
}
