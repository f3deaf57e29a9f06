//! Recording doubles for unit tests.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use super::connection::ConnectionId;
use crate::core::{DataSink, HalfClose, Network, TransportError};

pub(crate) const LOCAL_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
pub(crate) const PEER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
pub(crate) const LOCAL_PORT: u16 = 7000;
pub(crate) const PEER_PORT: u16 = 40000;

/// The flow most tests talk about.
pub(crate) fn peer_id() -> ConnectionId {
    ConnectionId::new(PEER_IP, PEER_PORT, LOCAL_IP, LOCAL_PORT)
}

/// Network that keeps every segment handed to it.
#[derive(Debug, Default)]
pub(crate) struct RecordingNetwork {
    sent: Vec<(Vec<u8>, IpAddr)>,
}

impl RecordingNetwork {
    pub(crate) fn take(&mut self) -> Vec<(Vec<u8>, IpAddr)> {
        std::mem::take(&mut self.sent)
    }

    pub(crate) fn len(&self) -> usize {
        self.sent.len()
    }
}

impl Network for RecordingNetwork {
    fn send(&mut self, segment: Vec<u8>, dest: IpAddr) {
        self.sent.push((segment, dest));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkEvent {
    Data(Vec<u8>),
    Closed(HalfClose),
    Reset(String),
}

/// Sink whose clones share one event log.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn data(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Data(bytes) => Some(bytes),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DataSink for RecordingSink {
    fn on_data(&mut self, _id: ConnectionId, data: &[u8]) {
        self.push(SinkEvent::Data(data.to_vec()));
    }

    fn on_close(&mut self, _id: ConnectionId, side: HalfClose) {
        self.push(SinkEvent::Closed(side));
    }

    fn on_reset(&mut self, _id: ConnectionId, reason: &TransportError) {
        self.push(SinkEvent::Reset(reason.to_string()));
    }
}
