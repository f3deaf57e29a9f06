//! Routes inbound segments to connections.
//!
//! The [`Demultiplexer`] owns the connection table, the network handle and
//! the retransmission timers. Every inbound segment, timer expiry and
//! application call goes through it, so each connection sees strictly one
//! event at a time.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use super::config::TransportConfig;
use super::connection::{CloseProgress, Connection, ConnectionId, Io};
use super::timer::RetransmitTimers;
use crate::core::{Network, TransportError, TransportResult};
use crate::wire::{SegmentHeader, parse_segment, verify_checksum};

type AcceptHandler = Box<dyn FnMut(&mut Connection) + Send>;

/// Listening endpoint: one port, many connections.
pub struct Demultiplexer<N: Network> {
    config: TransportConfig,
    network: N,
    connections: HashMap<ConnectionId, Connection>,
    timers: RetransmitTimers,
    on_accept: Option<AcceptHandler>,
}

impl<N: Network> Demultiplexer<N> {
    /// Create a demultiplexer that sends through `network`.
    pub fn new(config: TransportConfig, network: N) -> Self {
        Self {
            config,
            network,
            connections: HashMap::new(),
            timers: RetransmitTimers::new(),
            on_accept: None,
        }
    }

    /// Register the handler invoked for every new connection, before the
    /// handshake reply is sent. Typically it registers a data handler.
    pub fn on_accept<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Connection) + Send + 'static,
    {
        self.on_accept = Some(Box::new(handler));
    }

    /// Process one raw segment received from `src_addr` for `dst_addr`.
    ///
    /// Malformed, misdirected and corrupted segments are dropped here.
    pub fn on_segment(&mut self, segment: &[u8], src_addr: IpAddr, dst_addr: IpAddr, now: Instant) {
        if let Err(err) = self.route(segment, src_addr, dst_addr, now) {
            if err.is_silent_drop() {
                log::trace!("dropping segment from {src_addr}: {err}");
            } else {
                log::debug!("segment from {src_addr} not handled: {err}");
            }
        }
    }

    fn route(
        &mut self,
        segment: &[u8],
        src_addr: IpAddr,
        dst_addr: IpAddr,
        now: Instant,
    ) -> TransportResult<()> {
        let (header, payload) = parse_segment(segment)?;
        if header.dst_port != self.config.listen_port {
            return Err(TransportError::MisdirectedSegment {
                port: header.dst_port,
            });
        }
        if !self.config.ignore_checksum && !verify_checksum(segment, src_addr, dst_addr) {
            log::warn!("bad checksum on segment from {src_addr}:{}", header.src_port);
            return Err(TransportError::ChecksumMismatch);
        }

        let id = ConnectionId::new(src_addr, header.src_port, dst_addr, header.dst_port);
        log::trace!(
            "{id}: <- {:?} seq={} ack={} len={}",
            header.flags,
            header.seq,
            header.ack,
            payload.len()
        );

        if header.flags.is_syn() && !header.flags.is_ack() {
            self.accept(id, &header, now);
            return Ok(());
        }

        let Self {
            network,
            connections,
            timers,
            ..
        } = self;
        let conn = connections
            .get_mut(&id)
            .ok_or(TransportError::UnknownConnection)?;
        let mut io = Io {
            network,
            timers,
            now,
        };

        if header.flags.is_syn() {
            conn.on_syn_ack(&header, &mut io);
        } else if header.flags.is_ack() && header.flags.is_fin() {
            conn.on_fin(&mut io);
            connections.remove(&id);
        } else {
            conn.on_segment(&header, payload, &mut io);
        }
        Ok(())
    }

    fn accept(&mut self, id: ConnectionId, header: &SegmentHeader, now: Instant) {
        if self.connections.remove(&id).is_some() {
            // A repeated SYN restarts the flow from scratch.
            self.timers.cancel(&id);
            log::debug!("{id}: SYN for existing connection, replacing it");
        }

        let mut conn = Connection::accept(id, header.seq, &self.config);
        if let Some(handler) = self.on_accept.as_mut() {
            handler(&mut conn);
        }

        let mut io = Io {
            network: &mut self.network,
            timers: &mut self.timers,
            now,
        };
        conn.handshake(&mut io);
        log::info!("{id}: accepted, isn {}", conn.send_seq().wrapping_sub(1));
        self.connections.insert(id, conn);
    }

    /// Open a connection from `local_addr` (on the listening port) to `peer`.
    ///
    /// The SYN goes out immediately and is retransmitted until the peer's
    /// SYN|ACK arrives. Data queued with [`send`](Self::send) before then
    /// is held back until the handshake completes.
    pub fn connect(&mut self, local_addr: IpAddr, peer: SocketAddr, now: Instant) -> ConnectionId {
        let id = ConnectionId::new(peer.ip(), peer.port(), local_addr, self.config.listen_port);
        if self.connections.remove(&id).is_some() {
            self.timers.cancel(&id);
        }

        let mut conn = Connection::connect(id, &self.config);
        let mut io = Io {
            network: &mut self.network,
            timers: &mut self.timers,
            now,
        };
        conn.open(&mut io);
        log::info!("{id}: connecting, isn {}", conn.send_seq());
        self.connections.insert(id, conn);
        id
    }

    /// Fire every retransmission timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        for id in self.timers.expire(now) {
            let Self {
                network,
                connections,
                timers,
                ..
            } = self;
            let Some(conn) = connections.get_mut(&id) else {
                continue;
            };
            let mut io = Io {
                network,
                timers,
                now,
            };
            match conn.on_timeout(&mut io) {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    log::warn!("{id}: giving up after {} timeouts: {err}", conn.retry_count());
                    conn.reset(&err, &mut io);
                    connections.remove(&id);
                }
                Err(err) => log::debug!("{id}: timeout not handled: {err}"),
            }
        }
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Queue `data` on connection `id`.
    pub fn send(&mut self, id: ConnectionId, data: &[u8], now: Instant) -> TransportResult<()> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(TransportError::UnknownConnection)?;
        let mut io = Io {
            network: &mut self.network,
            timers: &mut self.timers,
            now,
        };
        conn.send(data, &mut io)
    }

    /// Close connection `id`.
    ///
    /// The first call sends FIN once all queued data has been acknowledged.
    /// Calling again drops the connection.
    pub fn close(&mut self, id: ConnectionId, now: Instant) -> TransportResult<()> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(TransportError::UnknownConnection)?;
        let mut io = Io {
            network: &mut self.network,
            timers: &mut self.timers,
            now,
        };
        if conn.close(&mut io) == CloseProgress::Finished {
            self.connections.remove(&id);
            log::debug!("{id}: removed");
        }
        Ok(())
    }

    /// Look up a connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Look up a connection mutably, e.g. to replace its data handler.
    pub fn connection_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connection is live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The network handle.
    pub fn network(&self) -> &N {
        &self.network
    }

    /// The network handle, mutably.
    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }
}

impl<N: Network> fmt::Debug for Demultiplexer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demultiplexer")
            .field("listen_port", &self.config.listen_port)
            .field("connections", &self.connections.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::HalfClose;
    use crate::transport::testing::{
        LOCAL_IP, LOCAL_PORT, PEER_IP, PEER_PORT, RecordingNetwork, RecordingSink, SinkEvent,
        peer_id,
    };
    use crate::wire::SegmentFlags;

    const PEER_ISN: u32 = 9000;
    const MSS: usize = 8;

    struct Peer {
        demux: Demultiplexer<RecordingNetwork>,
        sink: RecordingSink,
        now: Instant,
        /// Our next sequence number, as the remote peer.
        seq: u32,
        /// Server sequence number we acknowledge next.
        ack: u32,
    }

    impl Peer {
        fn new(config: TransportConfig) -> Self {
            let sink = RecordingSink::default();
            let mut demux = Demultiplexer::new(config, RecordingNetwork::default());
            let accept_sink = sink.clone();
            demux.on_accept(move |conn| conn.register_data_handler(accept_sink.clone()));
            Self {
                demux,
                sink,
                now: Instant::now(),
                seq: PEER_ISN,
                ack: 0,
            }
        }

        fn config() -> TransportConfig {
            TransportConfig::builder()
                .listen_port(LOCAL_PORT)
                .mss(MSS)
                .build()
        }

        fn deliver(&mut self, flags: SegmentFlags, seq: u32, ack: u32, payload: &[u8]) {
            let header = SegmentHeader::new(PEER_PORT, LOCAL_PORT, seq, ack, flags);
            let bytes = header.encode(payload, PEER_IP, LOCAL_IP);
            self.demux.on_segment(&bytes, PEER_IP, LOCAL_IP, self.now);
        }

        /// Complete the handshake; returns the server's ISN.
        fn connect(&mut self) -> u32 {
            self.deliver(SegmentFlags::SYN, PEER_ISN, 0, &[]);
            let replies = self.replies();
            assert_eq!(replies.len(), 1);
            let (header, _) = &replies[0];
            assert_eq!(header.flags.bits(), (SegmentFlags::SYN | SegmentFlags::ACK).bits());
            assert_eq!(header.ack, PEER_ISN + 1);
            self.seq = PEER_ISN + 1;
            self.ack = header.seq.wrapping_add(1);
            header.seq
        }

        fn replies(&mut self) -> Vec<(SegmentHeader, Vec<u8>)> {
            self.demux
                .network_mut()
                .take()
                .into_iter()
                .map(|(bytes, dest)| {
                    assert_eq!(dest, PEER_IP);
                    assert!(verify_checksum(&bytes, LOCAL_IP, PEER_IP));
                    let (header, payload) = parse_segment(&bytes).unwrap();
                    (header, payload.to_vec())
                })
                .collect()
        }

        fn conn(&self) -> &Connection {
            self.demux.connection(&peer_id()).unwrap()
        }
    }

    #[test]
    fn test_handshake_creates_connection() {
        let mut peer = Peer::new(Peer::config());
        let isn = peer.connect();

        assert!(isn <= 0xffff);
        assert_ne!(isn, PEER_ISN);
        assert_eq!(peer.demux.len(), 1);
        assert_eq!(peer.conn().send_seq(), isn + 1);
        assert_eq!(peer.conn().recv_ack(), PEER_ISN + 1);
    }

    #[test]
    fn test_repeated_syn_replaces_connection() {
        let mut peer = Peer::new(Peer::config());
        peer.connect();
        peer.demux.send(peer_id(), b"pending", peer.now).unwrap();
        peer.replies();

        peer.connect();
        assert_eq!(peer.demux.len(), 1);
        assert_eq!(peer.conn().in_flight_len(), 0);
        assert_eq!(peer.demux.next_deadline(), None);
    }

    #[test]
    fn test_data_delivered_and_acked() {
        let mut peer = Peer::new(Peer::config());
        peer.connect();

        peer.deliver(SegmentFlags::ACK, peer.seq, peer.ack, b"hello");
        let replies = peer.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0.ack, PEER_ISN + 6);
        assert!(replies[0].1.is_empty());
        assert_eq!(peer.sink.data(), b"hello");
    }

    #[test]
    fn test_wrong_port_dropped() {
        let mut peer = Peer::new(TransportConfig::builder().listen_port(8000).build());
        peer.deliver(SegmentFlags::SYN, PEER_ISN, 0, &[]);
        assert!(peer.demux.is_empty());
        assert!(peer.replies().is_empty());
    }

    #[test]
    fn test_corrupted_segment_dropped() {
        let mut peer = Peer::new(Peer::config());
        peer.connect();

        let header = SegmentHeader::new(PEER_PORT, LOCAL_PORT, peer.seq, peer.ack, SegmentFlags::ACK);
        let mut bytes = header.encode(b"hello", PEER_IP, LOCAL_IP);
        bytes[21] ^= 0x40;
        peer.demux.on_segment(&bytes, PEER_IP, LOCAL_IP, peer.now);

        assert!(peer.replies().is_empty());
        assert!(peer.sink.events().is_empty());
        assert_eq!(peer.conn().recv_ack(), PEER_ISN + 1);
    }

    #[test]
    fn test_ignore_checksum() {
        let config = TransportConfig::builder()
            .listen_port(LOCAL_PORT)
            .ignore_checksum(true)
            .build();
        let mut peer = Peer::new(config);
        peer.connect();

        let header = SegmentHeader::new(PEER_PORT, LOCAL_PORT, peer.seq, peer.ack, SegmentFlags::ACK);
        let mut bytes = header.encode(b"hi", PEER_IP, LOCAL_IP);
        bytes[16] = 0;
        bytes[17] = 0;
        peer.demux.on_segment(&bytes, PEER_IP, LOCAL_IP, peer.now);
        assert_eq!(peer.sink.data(), b"hi");
    }

    #[test]
    fn test_unknown_connection_dropped() {
        let mut peer = Peer::new(Peer::config());
        peer.deliver(SegmentFlags::ACK, 1, 1, b"stray");
        assert!(peer.demux.is_empty());
        assert!(peer.replies().is_empty());
    }

    #[test]
    fn test_retransmit_then_recover() {
        let mut peer = Peer::new(Peer::config());
        peer.connect();
        peer.demux.send(peer_id(), b"0123456789", peer.now).unwrap();
        let first = peer.replies();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].1, b"01234567");

        let deadline = peer.demux.next_deadline().unwrap();
        assert_eq!(deadline, peer.now + Duration::from_millis(500));
        peer.now = deadline;
        peer.demux.poll_timers(peer.now);

        let resent = peer.replies();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].0.seq, first[0].0.seq);
        assert_eq!(resent[0].1, b"01234567");
        assert_eq!(peer.conn().retry_count(), 1);

        let ack = peer.ack.wrapping_add(8);
        peer.deliver(SegmentFlags::ACK, peer.seq, ack, &[]);
        let next = peer.replies();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].0.seq, ack);
        assert_eq!(next[0].1, b"89");
        assert_eq!(peer.conn().retry_count(), 0);
        assert_eq!(peer.conn().window_size(), 1);
    }

    #[test]
    fn test_max_retransmits_resets() {
        let config = TransportConfig::builder()
            .listen_port(LOCAL_PORT)
            .max_retransmits(1)
            .build();
        let mut peer = Peer::new(config);
        peer.connect();
        peer.demux.send(peer_id(), b"lost", peer.now).unwrap();

        for _ in 0..2 {
            peer.now = peer.demux.next_deadline().unwrap();
            peer.demux.poll_timers(peer.now);
        }

        assert!(peer.demux.is_empty());
        assert_eq!(peer.demux.next_deadline(), None);
        assert_eq!(
            peer.sink.events(),
            vec![SinkEvent::Reset("max retransmits exceeded".into())]
        );
    }

    #[test]
    fn test_active_close() {
        let mut peer = Peer::new(Peer::config());
        peer.connect();
        peer.replies();

        peer.demux.close(peer_id(), peer.now).unwrap();
        let fin = peer.replies();
        assert_eq!(fin.len(), 1);
        assert!(fin[0].0.flags.is_fin());
        assert!(fin[0].0.flags.is_ack());
        assert_eq!(fin[0].0.seq, peer.ack);
        assert_eq!(peer.sink.events(), vec![SinkEvent::Closed(HalfClose::Local)]);
        assert!(matches!(
            peer.demux.send(peer_id(), b"late", peer.now),
            Err(TransportError::ConnectionClosed)
        ));

        peer.demux.close(peer_id(), peer.now).unwrap();
        assert!(peer.demux.is_empty());
        assert!(peer.replies().is_empty());
    }

    #[test]
    fn test_passive_close() {
        let mut peer = Peer::new(Peer::config());
        peer.connect();
        peer.demux.send(peer_id(), b"unacked", peer.now).unwrap();
        peer.replies();

        peer.deliver(SegmentFlags::FIN | SegmentFlags::ACK, peer.seq, peer.ack, &[]);
        let replies = peer.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0.ack, PEER_ISN + 2);
        assert!(!replies[0].0.flags.is_fin());

        assert!(peer.demux.is_empty());
        assert_eq!(peer.demux.next_deadline(), None);
        assert_eq!(peer.sink.events(), vec![SinkEvent::Closed(HalfClose::Remote)]);
    }

    #[test]
    fn test_connect_handshake() {
        let config = TransportConfig::builder().listen_port(PEER_PORT).build();
        let mut client = Demultiplexer::new(config, RecordingNetwork::default());
        let now = Instant::now();
        let server = SocketAddr::new(LOCAL_IP, LOCAL_PORT);

        let id = client.connect(PEER_IP, server, now);
        assert_eq!(id.peer(), server);
        assert_eq!(id.dst_port, PEER_PORT);
        let sent = client.network_mut().take();
        let (syn, _) = parse_segment(&sent[0].0).unwrap();
        assert!(syn.flags.is_syn());
        assert!(!syn.flags.is_ack());
        assert_eq!(sent[0].1, LOCAL_IP);

        let reply = SegmentHeader::new(
            LOCAL_PORT,
            PEER_PORT,
            PEER_ISN,
            syn.seq + 1,
            SegmentFlags::SYN | SegmentFlags::ACK,
        );
        let bytes = reply.encode(&[], LOCAL_IP, PEER_IP);
        client.on_segment(&bytes, LOCAL_IP, PEER_IP, now);

        let conn = client.connection(&id).unwrap();
        assert!(conn.is_established());
        assert_eq!(conn.recv_ack(), PEER_ISN + 1);
        assert_eq!(client.next_deadline(), None);

        let sent = client.network_mut().take();
        let (ack, _) = parse_segment(&sent[0].0).unwrap();
        assert!(ack.flags.is_ack());
        assert_eq!(ack.ack, PEER_ISN + 1);
    }

    #[test]
    fn test_stray_syn_ack_dropped() {
        let mut peer = Peer::new(Peer::config());
        peer.deliver(SegmentFlags::SYN | SegmentFlags::ACK, PEER_ISN, 1, &[]);
        assert!(peer.demux.is_empty());
        assert!(peer.replies().is_empty());
    }

    #[test]
    fn test_unknown_id_operations() {
        let mut peer = Peer::new(Peer::config());
        assert!(matches!(
            peer.demux.send(peer_id(), b"x", peer.now),
            Err(TransportError::UnknownConnection)
        ));
        assert!(matches!(
            peer.demux.close(peer_id(), peer.now),
            Err(TransportError::UnknownConnection)
        ));
    }
}
