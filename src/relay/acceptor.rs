//! Per-connection handler
//!
//! Drives one accepted peer: configures keepalive, registers the
//! connection, then runs the writer task (drains the outbound queue) and
//! the reader loop (decodes frames, delivers them on the inbound hook).
//! All failures stay on this connection; nothing propagates to the accept
//! loop or to other peers.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::connection::{ConnectionId, ConnectionPhase, ConnectionRegistry, PeerHandle};
use crate::error::RelayError;
use crate::protocol::FrameDecoder;
use crate::util;

use super::listener::InboundMessage;

const READ_CHUNK: usize = 4096;

/// Handles a single accepted peer connection
pub(crate) struct ConnectionHandler {
    registry: Arc<ConnectionRegistry>,
    config: Arc<Config>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl ConnectionHandler {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        config: Arc<Config>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        Self {
            registry,
            config,
            inbound_tx,
        }
    }

    /// Run the connection to completion
    ///
    /// The returned error covers setup only; once the connection is
    /// registered, failures are handled here and recorded as the terminal
    /// phase instead.
    pub(crate) async fn handle(
        self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), RelayError> {
        // Registry logs and rejects at capacity
        let Some(mut registration) = self.registry.register(peer_addr) else {
            return Ok(());
        };
        let id = registration.handle.id;

        if let Err(e) = util::configure_keepalive(
            &stream,
            self.config.transport.keepalive_idle(),
            self.config.transport.keepalive_interval(),
        ) {
            self.registry.remove(id, ConnectionPhase::Failed);
            return Err(RelayError::ConnectionSetup(e));
        }
        self.registry.set_preparing(id);

        let (read_half, mut write_half) = stream.into_split();

        // Writer task: transmits queued frames in call order for this peer
        let writer_registry = self.registry.clone();
        let mut writer_cancel = registration.cancelled.clone();
        let mut outbound = registration.outbound;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = write_half.write_all(&frame).await {
                                let err = RelayError::Write(e);
                                debug!(conn_id = %id, error = %err, "Peer write failed");
                                writer_registry.remove(id, ConnectionPhase::Failed);
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_cancel.changed() => break,
                }
            }
        });

        // Transport is up and both directions are being serviced
        self.registry.activate(id);

        let mut shutdown_rx = self.registry.subscribe_shutdown();
        let terminal = self
            .read_loop(
                id,
                read_half,
                &registration.handle,
                &mut registration.cancelled,
                &mut shutdown_rx,
            )
            .await;
        self.registry.remove(id, terminal);

        Ok(())
    }

    /// Decode inbound frames until the connection reaches a terminal state
    ///
    /// Returns the terminal phase to record: `Cancelled` on clean EOF or
    /// shutdown, `Failed` on I/O or framing errors.
    async fn read_loop(
        &self,
        id: ConnectionId,
        mut read_half: OwnedReadHalf,
        handle: &PeerHandle,
        cancelled: &mut watch::Receiver<bool>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> ConnectionPhase {
        let mut decoder = FrameDecoder::new(self.config.transport.max_frame_len);
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                read = read_half.read(&mut chunk) => match read {
                    Ok(0) => {
                        debug!(conn_id = %id, "Peer closed connection");
                        return ConnectionPhase::Cancelled;
                    }
                    Ok(n) => {
                        decoder.feed(&chunk[..n]);
                        loop {
                            match decoder.next_message() {
                                Ok(Some(text)) => self.deliver(id, handle, text),
                                Ok(None) => break,
                                Err(e) => {
                                    let err = RelayError::Decode(e);
                                    warn!(conn_id = %id, error = %err, "Malformed peer frame");
                                    return ConnectionPhase::Failed;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(conn_id = %id, error = %e, "Peer read failed");
                        return ConnectionPhase::Failed;
                    }
                },
                _ = cancelled.changed() => return ConnectionPhase::Cancelled,
                _ = shutdown_rx.recv() => return ConnectionPhase::Cancelled,
            }
        }
    }

    /// Hand a decoded message to the inbound hook
    fn deliver(&self, id: ConnectionId, handle: &PeerHandle, text: String) {
        handle.record_received(text.len() as u64);
        trace!(conn_id = %id, len = text.len(), "Inbound message");

        if let Err(e) = self.inbound_tx.try_send(InboundMessage { from: id, text }) {
            debug!(conn_id = %id, error = %e, "Inbound message dropped (no consumer)");
        }
    }
}
