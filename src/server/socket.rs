//! UDP socket standing in for the datagram network layer.
//!
//! Every host runs one link socket on a well-known UDP port. A segment for
//! IP address `A` is sent as a UDP datagram to `A:link_port`, unless we have
//! already heard from `A` on some other UDP port, in which case we answer
//! there. The latter lets several hosts share one loopback address.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

/// Default receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

/// Async UDP socket carrying raw segments.
#[derive(Debug)]
pub struct LinkSocket {
    /// The underlying UDP socket.
    socket: Arc<UdpSocket>,
    /// Receive buffer.
    recv_buffer: Vec<u8>,
    /// UDP port peers' link sockets listen on.
    link_port: u16,
    /// Local IP as seen by peers.
    local_ip: IpAddr,
    /// Last UDP address each peer IP was heard from.
    peers: HashMap<IpAddr, SocketAddr>,
}

impl LinkSocket {
    /// Bind a link socket. Peers are assumed to listen on the same port.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let port = socket.local_addr()?.port();
        Self::from_socket(socket, port)
    }

    /// Wrap an existing UDP socket; peers are reached on `link_port`.
    pub fn from_socket(socket: UdpSocket, link_port: u16) -> io::Result<Self> {
        let local_ip = socket.local_addr()?.ip();
        if local_ip.is_unspecified() {
            log::warn!("link socket bound to a wildcard address; checksums will not verify");
        }
        Ok(Self {
            socket: Arc::new(socket),
            recv_buffer: vec![0u8; DEFAULT_RECV_BUFFER_SIZE],
            link_port,
            local_ip,
            peers: HashMap::new(),
        })
    }

    /// Get the local UDP address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Local IP used as the segment destination address.
    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    /// UDP port assumed for peers not heard from yet.
    pub fn link_port(&self) -> u16 {
        self.link_port
    }

    /// UDP address a segment for `dest` is sent to.
    pub fn resolve(&self, dest: IpAddr) -> SocketAddr {
        self.peers
            .get(&dest)
            .copied()
            .unwrap_or_else(|| SocketAddr::new(dest, self.link_port))
    }

    /// Send an encoded segment to host `dest`.
    pub async fn send_segment(&self, segment: &[u8], dest: IpAddr) -> io::Result<usize> {
        self.socket.send_to(segment, self.resolve(dest)).await
    }

    /// Receive a segment, returning it with its source and destination IPs.
    pub async fn recv_segment(&mut self) -> io::Result<(&[u8], IpAddr, IpAddr)> {
        let (len, from) = self.socket.recv_from(&mut self.recv_buffer).await?;
        if self.peers.insert(from.ip(), from) != Some(from) {
            log::debug!("link: peer {} reachable at {from}", from.ip());
        }
        Ok((&self.recv_buffer[..len], from.ip(), self.local_ip))
    }
}
