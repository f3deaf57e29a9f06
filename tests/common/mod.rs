//! Shared harness: two endpoints joined by a simulated link.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reliable_transport::prelude::*;
use reliable_transport::wire::{SegmentFlags, parse_segment};

pub const SERVER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
pub const CLIENT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
pub const SERVER_PORT: u16 = 7000;
pub const CLIENT_PORT: u16 = 40000;

/// One simulated round trip takes two ticks.
pub const TICK: Duration = Duration::from_millis(10);

/// Network that queues segments for the link to pick up.
#[derive(Debug, Default)]
pub struct Outbox(pub Vec<(Vec<u8>, IpAddr)>);

impl Network for Outbox {
    fn send(&mut self, segment: Vec<u8>, dest: IpAddr) {
        self.0.push((segment, dest));
    }
}

/// Everything a connection handed to the application.
#[derive(Debug, Default)]
pub struct Received {
    pub data: Vec<u8>,
    pub closes: Vec<HalfClose>,
    /// Stream length seen when each close arrived.
    pub data_at_close: Vec<usize>,
    pub resets: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Collector(pub Arc<Mutex<Received>>);

impl Collector {
    pub fn data(&self) -> Vec<u8> {
        self.0.lock().unwrap().data.clone()
    }

    pub fn closes(&self) -> Vec<HalfClose> {
        self.0.lock().unwrap().closes.clone()
    }
}

impl DataSink for Collector {
    fn on_data(&mut self, _id: ConnectionId, data: &[u8]) {
        self.0.lock().unwrap().data.extend_from_slice(data);
    }

    fn on_close(&mut self, _id: ConnectionId, side: HalfClose) {
        let mut received = self.0.lock().unwrap();
        let len = received.data.len();
        received.closes.push(side);
        received.data_at_close.push(len);
    }

    fn on_reset(&mut self, _id: ConnectionId, _reason: &TransportError) {
        self.0.lock().unwrap().resets += 1;
    }
}

pub struct Host {
    pub ip: IpAddr,
    pub demux: Demultiplexer<Outbox>,
    pub received: Collector,
}

impl Host {
    pub fn new(ip: IpAddr, config: TransportConfig) -> Self {
        let received = Collector::default();
        let mut demux = Demultiplexer::new(config, Outbox::default());
        let sink = received.clone();
        demux.on_accept(move |conn| conn.register_data_handler(sink.clone()));
        Self {
            ip,
            demux,
            received,
        }
    }
}

/// What the link does to a segment in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Drop,
    Corrupt,
}

/// Decides the fate of a segment given its flags and payload.
pub type Impairment = Box<dyn FnMut(SegmentFlags, &[u8]) -> Fate>;

pub fn lossless() -> Impairment {
    Box::new(|_, _| Fate::Deliver)
}

/// Drop every `nth` data segment and every `nth + 2`th pure ACK.
/// Handshake and FIN segments always get through.
pub fn periodic_loss(nth: usize) -> Impairment {
    let mut data = 0usize;
    let mut acks = 0usize;
    Box::new(move |flags, payload| {
        if flags.is_syn() || flags.is_fin() {
            return Fate::Deliver;
        }
        let (counter, period) = if payload.is_empty() {
            (&mut acks, nth + 2)
        } else {
            (&mut data, nth)
        };
        *counter += 1;
        if *counter % period == 0 {
            Fate::Drop
        } else {
            Fate::Deliver
        }
    })
}

/// Flip a payload bit in every `nth` data segment.
pub fn periodic_corruption(nth: usize) -> Impairment {
    let mut data = 0usize;
    Box::new(move |_, payload| {
        if payload.is_empty() {
            return Fate::Deliver;
        }
        data += 1;
        if data % nth == 0 {
            Fate::Corrupt
        } else {
            Fate::Deliver
        }
    })
}

/// Two hosts joined by a link with one tick of latency each way.
pub struct Link {
    pub server: Host,
    pub client: Host,
    pub now: Instant,
    impair: Impairment,
    to_server: Vec<Vec<u8>>,
    to_client: Vec<Vec<u8>>,
    pub dropped: usize,
}

impl Link {
    pub fn new(server: TransportConfig, client: TransportConfig, impair: Impairment) -> Self {
        Self {
            server: Host::new(SERVER_IP, server),
            client: Host::new(CLIENT_IP, client),
            now: Instant::now(),
            impair,
            to_server: Vec::new(),
            to_client: Vec::new(),
            dropped: 0,
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(SERVER_IP, SERVER_PORT)
    }

    /// Identity of the flow as the server sees it.
    pub fn server_side_id(&self) -> ConnectionId {
        ConnectionId::new(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT)
    }

    /// Advance one tick: deliver what is in flight, fire timers, pick up output.
    pub fn tick(&mut self) {
        self.now += TICK;

        for segment in std::mem::take(&mut self.to_server) {
            self.server
                .demux
                .on_segment(&segment, CLIENT_IP, SERVER_IP, self.now);
        }
        for segment in std::mem::take(&mut self.to_client) {
            self.client
                .demux
                .on_segment(&segment, SERVER_IP, CLIENT_IP, self.now);
        }

        self.server.demux.poll_timers(self.now);
        self.client.demux.poll_timers(self.now);

        let from_client = std::mem::take(&mut self.client.demux.network_mut().0);
        let from_server = std::mem::take(&mut self.server.demux.network_mut().0);
        for (segment, dest) in from_client {
            assert_eq!(dest, SERVER_IP);
            if let Some(segment) = self.apply_impairment(segment) {
                self.to_server.push(segment);
            }
        }
        for (segment, dest) in from_server {
            assert_eq!(dest, CLIENT_IP);
            if let Some(segment) = self.apply_impairment(segment) {
                self.to_client.push(segment);
            }
        }
    }

    fn apply_impairment(&mut self, mut segment: Vec<u8>) -> Option<Vec<u8>> {
        let (header, payload) = parse_segment(&segment).ok()?;
        match (self.impair)(header.flags, payload) {
            Fate::Deliver => Some(segment),
            Fate::Drop => {
                self.dropped += 1;
                None
            }
            Fate::Corrupt => {
                let last = segment.len() - 1;
                segment[last] ^= 0x01;
                Some(segment)
            }
        }
    }

    /// Tick until `done` holds, failing after `limit` ticks.
    pub fn run_until(&mut self, limit: usize, mut done: impl FnMut(&Link) -> bool) {
        for _ in 0..limit {
            if done(self) {
                return;
            }
            self.tick();
        }
        assert!(done(self), "condition not reached after {limit} ticks");
    }

    /// Open a connection from the client and wait for the handshake.
    pub fn connect(&mut self) -> ConnectionId {
        let server = self.server_addr();
        let id = self.client.demux.connect(CLIENT_IP, server, self.now);
        let sink = self.client.received.clone();
        self.client
            .demux
            .connection_mut(&id)
            .unwrap()
            .register_data_handler(sink);
        self.run_until(50, |link| {
            link.client.demux.connection(&id).is_some_and(|c| c.is_established())
        });
        id
    }
}

pub fn config(port: u16) -> TransportConfigBuilder {
    TransportConfig::builder()
        .listen_port(port)
        .mss(100)
        .initial_rto(Duration::from_millis(100))
}

/// Deterministic, non-repeating test payload.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}
