//! TCP relay listener
//!
//! Accept loop plus the broadcast surface. Accepted connections are
//! registered and handed to a per-connection handler; outbound messages
//! fan out to every ready peer through the registry.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::discovery;
use crate::error::RelayError;
use crate::util;

use super::acceptor::ConnectionHandler;

/// Depth of the shared inbound-message queue
const INBOUND_QUEUE_DEPTH: usize = 256;

/// Listening endpoint lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    /// Created, not yet started
    Idle,
    /// Binding the endpoint
    Starting,
    /// Accepting connections
    Ready,
    /// Endpoint could not be set up; the process keeps running
    Failed,
    /// Shut down
    Stopped,
}

/// A message decoded from one peer, delivered on the inbound hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Connection the message arrived on
    pub from: ConnectionId,
    /// Decoded text
    pub text: String,
}

/// Local-network broadcast relay
pub struct RelayServer {
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
    phase: Mutex<ListenerPhase>,
    local_addr: Mutex<Option<SocketAddr>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Create a new server instance; call [`start`](Self::start) to serve
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let registry = ConnectionRegistry::new(
            config.transport.max_connections,
            config.transport.send_queue_depth,
        );
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            registry,
            phase: Mutex::new(ListenerPhase::Idle),
            local_addr: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            shutdown_tx,
        })
    }

    /// Bind the listener, start advertising, and begin accepting
    ///
    /// Returns as soon as the accept loop is spawned; it never blocks on
    /// peer traffic. On setup failure the phase moves to `Failed` and the
    /// error is surfaced to the caller; the process is expected to keep
    /// running and restart policy is the caller's.
    pub fn start(self: &Arc<Self>) -> Result<(), RelayError> {
        {
            let mut phase = self.phase.lock();
            if *phase != ListenerPhase::Idle {
                warn!(?phase, "start() ignored: listener already started");
                return Ok(());
            }
            *phase = ListenerPhase::Starting;
        }

        let listener = match self.bind_listener() {
            Ok(listener) => listener,
            Err(e) => {
                *self.phase.lock() = ListenerPhase::Failed;
                return Err(e);
            }
        };

        if self.config.discovery.enabled {
            let port = self.local_addr().map(|addr| addr.port()).unwrap_or_default();
            if let Err(e) = discovery::spawn_advertiser(
                &self.config.discovery,
                port,
                self.registry.subscribe_shutdown(),
            ) {
                *self.phase.lock() = ListenerPhase::Failed;
                return Err(e);
            }
        }

        let server = Arc::clone(self);
        tokio::spawn(async move {
            server.accept_loop(listener).await;
        });

        *self.phase.lock() = ListenerPhase::Ready;
        info!(
            bind_addr = ?self.local_addr(),
            service_name = %self.config.discovery.service_name,
            service_type = %self.config.discovery.service_type,
            "Relay accepting connections"
        );
        Ok(())
    }

    fn bind_listener(&self) -> Result<TcpListener, RelayError> {
        let std_listener = util::create_listener(self.config.server.bind_addr)
            .map_err(RelayError::ListenerSetup)?;
        let listener = TcpListener::from_std(std_listener).map_err(RelayError::ListenerSetup)?;
        let addr = listener.local_addr().map_err(RelayError::ListenerSetup)?;
        *self.local_addr.lock() = Some(addr);
        Ok(listener)
    }

    /// Main accept loop
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let handler = ConnectionHandler::new(
                                self.registry.clone(),
                                self.config.clone(),
                                self.inbound_tx.clone(),
                            );
                            tokio::spawn(async move {
                                if let Err(e) = handler.handle(stream, peer_addr).await {
                                    debug!(%peer_addr, error = %e, "Connection discarded");
                                }
                            });
                        }
                        Err(e) => {
                            // Transient accept errors (e.g. fd exhaustion) are
                            // not fatal to the listener
                            warn!(error = %e, "Accept failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Accept loop stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Queue `text` to every ready peer
    ///
    /// Delivery to each peer's queue is immediate; no write is awaited and
    /// an empty connection set is not an error. Returns the number of
    /// peers the message was queued to.
    pub fn broadcast(&self, text: &str) -> usize {
        self.registry.broadcast(text)
    }

    /// Number of currently registered connections
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Current listener phase
    pub fn listener_phase(&self) -> ListenerPhase {
        *self.phase.lock()
    }

    /// Take the inbound-message receiver (duplex hook)
    ///
    /// Messages decoded from peers are delivered here. When nobody holds
    /// the receiver, inbound messages are logged and dropped. Can be taken
    /// once.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }

    /// Stop the listener and cancel all connections; idempotent
    pub fn shutdown(&self) {
        {
            let mut phase = self.phase.lock();
            if *phase == ListenerPhase::Stopped {
                return;
            }
            *phase = ListenerPhase::Stopped;
        }

        info!("Relay shutting down");
        let _ = self.shutdown_tx.send(true);
        self.registry.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(bind: &str) -> Arc<Config> {
        let mut config = Config::default();
        config.server.bind_addr = bind.parse().unwrap();
        config.discovery.enabled = false;
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_phase_progression_and_shutdown_idempotence() {
        let server = RelayServer::new(test_config("127.0.0.1:0"));
        assert_eq!(server.listener_phase(), ListenerPhase::Idle);

        server.start().unwrap();
        assert_eq!(server.listener_phase(), ListenerPhase::Ready);
        assert!(server.local_addr().is_some());

        server.shutdown();
        assert_eq!(server.listener_phase(), ListenerPhase::Stopped);
        assert_eq!(server.connection_count(), 0);

        server.shutdown();
        assert_eq!(server.listener_phase(), ListenerPhase::Stopped);
    }

    #[tokio::test]
    async fn test_bind_failure_sets_failed_phase() {
        let blocker = RelayServer::new(test_config("127.0.0.1:0"));
        blocker.start().unwrap();
        let taken = blocker.local_addr().unwrap();

        let server = RelayServer::new(test_config(&taken.to_string()));
        assert!(server.start().is_err());
        assert_eq!(server.listener_phase(), ListenerPhase::Failed);

        blocker.shutdown();
    }

    #[tokio::test]
    async fn test_broadcast_on_empty_set() {
        let server = RelayServer::new(test_config("127.0.0.1:0"));
        server.start().unwrap();
        assert_eq!(server.broadcast("nobody"), 0);
        server.shutdown();
    }
}
