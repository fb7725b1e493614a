//! Socket utilities and tuning

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Create a TCP listener with address reuse enabled
pub fn create_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    Ok(socket.into())
}

/// Configure keepalive probes on an accepted stream
///
/// Short idle and interval times detect peer departure promptly on an
/// unrouted local segment, instead of waiting for the next failed write.
pub fn configure_keepalive(
    stream: &TcpStream,
    idle: Duration,
    interval: Duration,
) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(idle).with_interval(interval);

    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&keepalive)?;
    sock.set_nodelay(true)?;

    Ok(())
}

/// Create a UDP socket for sending multicast beacons
pub fn create_beacon_socket() -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_nonblocking(true)?;

    let bind_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
    socket.bind(&bind_addr.into())?;

    Ok(socket.into())
}
