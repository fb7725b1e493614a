//! Local-service advertiser
//!
//! Advertises the relay on the local segment with a periodic UDP multicast
//! beacon carrying the service name/type tuple and the TCP port to connect
//! to. Peers on the same unrouted network discover the relay by listening
//! on the beacon group; no central directory is involved.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::RelayError;
use crate::util;

/// Multicast group beacons are sent to
pub const BEACON_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 60);

/// Beacon payload advertised on the local segment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Beacon {
    /// Service name, e.g. "server"
    pub name: String,
    /// Service type tag, e.g. "_qz._tcp"
    #[serde(rename = "type")]
    pub service_type: String,
    /// TCP port the relay listens on
    pub port: u16,
}

impl Beacon {
    /// Build the beacon for the given discovery config and listener port
    pub fn new(config: &DiscoveryConfig, port: u16) -> Self {
        Self {
            name: config.service_name.clone(),
            service_type: config.service_type.clone(),
            port,
        }
    }
}

/// Spawn the beacon task
///
/// Sends one beacon per `beacon_interval` until the shutdown channel
/// fires. Socket setup failure is fatal to server start; individual send
/// failures are logged and skipped.
pub fn spawn_advertiser(
    config: &DiscoveryConfig,
    tcp_port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>, RelayError> {
    let socket = util::create_beacon_socket().map_err(RelayError::ListenerSetup)?;
    let socket = UdpSocket::from_std(socket).map_err(RelayError::ListenerSetup)?;

    let beacon = Beacon::new(config, tcp_port);
    let payload = serde_json::to_vec(&beacon)
        .map_err(|e| RelayError::ListenerSetup(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    let target = SocketAddr::from((BEACON_GROUP, config.port));
    let interval = config.beacon_interval();

    info!(
        name = %beacon.name,
        service_type = %beacon.service_type,
        port = beacon.port,
        beacon_port = config.port,
        "Advertising service"
    );

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match socket.send_to(&payload, target).await {
                        Ok(_) => debug!("Beacon sent"),
                        Err(e) => warn!(error = %e, "Beacon send failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Advertiser stopping");
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_payload_shape() {
        let config = DiscoveryConfig::default();
        let beacon = Beacon::new(&config, 7001);
        let json = serde_json::to_value(&beacon).unwrap();

        assert_eq!(json["name"], "server");
        assert_eq!(json["type"], "_qz._tcp");
        assert_eq!(json["port"], 7001);
    }

    #[test]
    fn test_beacon_round_trip() {
        let beacon = Beacon {
            name: "server".to_string(),
            service_type: "_qz._tcp".to_string(),
            port: 9000,
        };
        let bytes = serde_json::to_vec(&beacon).unwrap();
        let parsed: Beacon = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, beacon);
    }
}
