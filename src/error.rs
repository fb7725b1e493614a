//! Relay error taxonomy

use crate::protocol::DecodeError;
use thiserror::Error;

/// Errors that can occur during relay operation.
///
/// Per-connection failures (`Write`, `Decode`, `ConnectionSetup`) are
/// isolated to the affected connection and never reach `broadcast`'s
/// caller; only `ListenerSetup` surfaces from `start`.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The listening endpoint could not bind or advertise.
    #[error("listener setup failed: {0}")]
    ListenerSetup(#[source] std::io::Error),
    /// A newly accepted connection could not be configured.
    #[error("connection setup failed: {0}")]
    ConnectionSetup(#[source] std::io::Error),
    /// An outbound write failed; the connection is failed and removed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    /// Inbound framing was malformed; the connection is failed and removed.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}
