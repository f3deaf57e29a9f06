//! Per-connection reliable delivery.
//!
//! A [`Connection`] owns the sequence counters, the unsent and in-flight
//! byte queues, the congestion window and the RTT estimator of one flow.
//! It reacts to three kinds of events, always one at a time:
//!
//! - inbound segments routed to it by the [`Demultiplexer`](super::Demultiplexer),
//! - its retransmission timer firing,
//! - application `send` / `close` calls.
//!
//! ```text
//!  send_seq             send_seq + in_flight
//!     │                        │
//! ────┼────────────────────────┼──────────────────────▶ seq space
//!     │ <──── in flight ────▶  │ <──── unsent ────▶
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use rand::Rng;

use super::config::TransportConfig;
use super::congestion::CongestionWindow;
use super::timer::RetransmitTimers;
use super::timing::{RttEstimator, RttSampler};
use crate::core::constants::MAX_INITIAL_SEQ;
use crate::core::{DataSink, HalfClose, Network, TransportError, TransportResult};
use crate::wire::{SegmentFlags, SegmentHeader};

/// Identity of one flow, seen from the local endpoint.
///
/// `src` is the peer that sent the inbound segments, `dst` is us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    /// Peer address.
    pub src_addr: IpAddr,
    /// Peer port.
    pub src_port: u16,
    /// Local address.
    pub dst_addr: IpAddr,
    /// Local port.
    pub dst_port: u16,
}

impl ConnectionId {
    /// Create an identity from the 4-tuple of an inbound segment.
    pub fn new(src_addr: IpAddr, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Self {
        Self {
            src_addr,
            src_port,
            dst_addr,
            dst_port,
        }
    }

    /// Remote endpoint.
    pub fn peer(&self) -> SocketAddr {
        SocketAddr::new(self.src_addr, self.src_port)
    }

    /// Local endpoint.
    pub fn local(&self) -> SocketAddr {
        SocketAddr::new(self.dst_addr, self.dst_port)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.peer(), self.local())
    }
}

/// Teardown progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    /// Both directions open.
    Open,
    /// We sent FIN.
    FinSent,
    /// Teardown complete; the entry is about to leave the table.
    Closed,
}

/// Result of an application `close` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseProgress {
    /// FIN went out; the connection stays in the table.
    FinSent,
    /// Teardown is complete; remove the entry.
    Finished,
}

/// Side effects available to a connection while it handles one event.
pub(crate) struct Io<'a> {
    pub network: &'a mut dyn Network,
    pub timers: &'a mut RetransmitTimers,
    pub now: Instant,
}

/// Our initial sequence number must not repeat the peer's.
fn distinct_isn(isn: u32, peer_seq: u32) -> u32 {
    if isn == peer_seq {
        isn.wrapping_add(1) & MAX_INITIAL_SEQ
    } else {
        isn
    }
}

/// One reliable byte-stream connection.
pub struct Connection {
    id: ConnectionId,
    mss: usize,
    max_retransmits: Option<u32>,
    reack_duplicates: bool,

    /// Next sequence number of ours the peer has not acknowledged.
    send_seq: u32,
    /// Next sequence number expected from the peer.
    recv_ack: u32,

    /// Bytes queued by the application, not yet transmitted.
    unsent: Vec<u8>,
    /// Bytes transmitted starting at `send_seq`, not yet acknowledged.
    in_flight: Vec<u8>,
    /// Application closed; FIN follows once every queued byte is acknowledged.
    fin_queued: bool,
    /// Our SYN is out and the peer's SYN|ACK has not arrived yet.
    syn_pending: bool,

    window: CongestionWindow,
    rtt: RttEstimator,
    sampler: RttSampler,
    retry_count: u32,
    close_state: CloseState,

    sink: Option<Box<dyn DataSink>>,
}

impl Connection {
    /// Create the state for a flow whose SYN carried `peer_seq`.
    pub(crate) fn accept(id: ConnectionId, peer_seq: u32, config: &TransportConfig) -> Self {
        let isn = distinct_isn(rand::thread_rng().gen_range(0..=MAX_INITIAL_SEQ), peer_seq);
        Self::with_initial_seq(id, peer_seq, isn, config)
    }

    pub(crate) fn with_initial_seq(
        id: ConnectionId,
        peer_seq: u32,
        isn: u32,
        config: &TransportConfig,
    ) -> Self {
        Self {
            id,
            mss: config.mss,
            max_retransmits: config.max_retransmits,
            reack_duplicates: config.reack_duplicates,
            send_seq: isn,
            recv_ack: peer_seq.wrapping_add(1),
            unsent: Vec::new(),
            in_flight: Vec::new(),
            fin_queued: false,
            syn_pending: false,
            window: CongestionWindow::new(config.initial_window),
            rtt: RttEstimator::new(config.initial_rto),
            sampler: RttSampler::new(),
            retry_count: 0,
            close_state: CloseState::Open,
            sink: None,
        }
    }

    /// Create the state for an active open towards the peer in `id`.
    pub(crate) fn connect(id: ConnectionId, config: &TransportConfig) -> Self {
        let isn = rand::thread_rng().gen_range(0..=MAX_INITIAL_SEQ);
        let mut conn = Self::with_initial_seq(id, 0, isn, config);
        conn.recv_ack = 0;
        conn.syn_pending = true;
        conn
    }

    /// Register the receiver of stream data and close signals.
    pub fn register_data_handler<S: DataSink + 'static>(&mut self, sink: S) {
        self.sink = Some(Box::new(sink));
    }

    /// Flow identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Oldest unacknowledged sequence number of ours.
    pub fn send_seq(&self) -> u32 {
        self.send_seq
    }

    /// Next sequence number expected from the peer.
    pub fn recv_ack(&self) -> u32 {
        self.recv_ack
    }

    /// Congestion window in segments.
    pub fn window_size(&self) -> usize {
        self.window.segments()
    }

    /// Consecutive timeouts since the last full acknowledgment.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Bytes transmitted but not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Bytes queued but not yet transmitted.
    pub fn unsent_len(&self) -> usize {
        self.unsent.len()
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    /// RTT estimator state.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Teardown progress.
    pub fn close_state(&self) -> CloseState {
        self.close_state
    }

    /// Check if the handshake has completed.
    pub fn is_established(&self) -> bool {
        !self.syn_pending
    }

    /// Sequence number following everything transmitted so far.
    fn next_seq(&self) -> u32 {
        self.send_seq.wrapping_add(self.in_flight.len() as u32)
    }

    // -------------------------------------------------------------------------
    // Handshake and teardown
    // -------------------------------------------------------------------------

    /// Answer the peer's SYN. The SYN consumes one of our sequence numbers.
    pub(crate) fn handshake(&mut self, io: &mut Io<'_>) {
        self.transmit(self.send_seq, SegmentFlags::SYN | SegmentFlags::ACK, &[], io);
        self.send_seq = self.send_seq.wrapping_add(1);
    }

    /// Send our SYN for an active open.
    pub(crate) fn open(&mut self, io: &mut Io<'_>) {
        self.transmit(self.send_seq, SegmentFlags::SYN, &[], io);
        self.arm_timer(io);
    }

    /// Peer answered our SYN.
    pub(crate) fn on_syn_ack(&mut self, header: &SegmentHeader, io: &mut Io<'_>) {
        if !self.syn_pending || header.ack != self.send_seq.wrapping_add(1) {
            log::trace!("{}: unexpected SYN|ACK ack={}", self.id, header.ack);
            return;
        }

        io.timers.cancel(&self.id);
        self.syn_pending = false;
        self.retry_count = 0;
        self.recv_ack = header.seq.wrapping_add(1);
        self.send_seq = self.send_seq.wrapping_add(1);
        self.send_ack(io);
        log::info!("{}: established, peer isn {}", self.id, header.seq);

        if !self.unsent.is_empty() {
            self.send_batch(io);
        }
    }

    /// Application close.
    ///
    /// The first call sends FIN, or queues it until all outstanding data has
    /// been acknowledged; a second call finishes teardown without waiting for
    /// the peer.
    pub(crate) fn close(&mut self, io: &mut Io<'_>) -> CloseProgress {
        if self.close_state != CloseState::Open || self.syn_pending {
            io.timers.cancel(&self.id);
            self.close_state = CloseState::Closed;
            return CloseProgress::Finished;
        }

        self.close_state = CloseState::FinSent;
        if self.unsent.is_empty() && self.in_flight.is_empty() {
            self.send_fin(io);
        } else {
            self.fin_queued = true;
            log::debug!(
                "{}: FIN queued behind {} bytes",
                self.id,
                self.unsent.len() + self.in_flight.len()
            );
        }
        CloseProgress::FinSent
    }

    /// Put FIN|ACK on the wire. Nothing may be outstanding.
    fn send_fin(&mut self, io: &mut Io<'_>) {
        debug_assert!(self.in_flight.is_empty() && self.unsent.is_empty());
        self.fin_queued = false;
        let fin_seq = self.send_seq;
        self.transmit(fin_seq, SegmentFlags::FIN | SegmentFlags::ACK, &[], io);
        self.notify_close(HalfClose::Local);
        self.send_seq = self.send_seq.wrapping_add(1);
        log::info!("{}: FIN sent at seq {fin_seq}", self.id);
    }

    /// Peer sent FIN|ACK. The FIN consumes one of the peer's sequence numbers.
    pub(crate) fn on_fin(&mut self, io: &mut Io<'_>) {
        self.recv_ack = self.recv_ack.wrapping_add(1);
        self.notify_close(HalfClose::Remote);
        self.send_ack(io);
        io.timers.cancel(&self.id);
        self.close_state = CloseState::Closed;
        log::info!("{}: closed by peer", self.id);
    }

    /// Tear down without a close handshake.
    pub(crate) fn reset(&mut self, reason: &TransportError, io: &mut Io<'_>) {
        io.timers.cancel(&self.id);
        self.close_state = CloseState::Closed;
        if let Some(sink) = self.sink.as_mut() {
            sink.on_reset(self.id, reason);
        }
    }

    // -------------------------------------------------------------------------
    // Receive path
    // -------------------------------------------------------------------------

    /// Handle a segment for this flow (anything but SYN or FIN|ACK).
    pub(crate) fn on_segment(&mut self, header: &SegmentHeader, payload: &[u8], io: &mut Io<'_>) {
        if self.syn_pending {
            log::trace!("{}: segment before handshake completed, dropped", self.id);
            return;
        }

        if !payload.is_empty() {
            if header.seq == self.recv_ack {
                self.recv_ack = self.recv_ack.wrapping_add(payload.len() as u32);
                log::trace!(
                    "{}: delivered {} bytes, recv_ack={}",
                    self.id,
                    payload.len(),
                    self.recv_ack
                );
                self.deliver(payload);
                self.send_ack(io);
            } else {
                log::trace!(
                    "{}: dropped segment seq={} (expected {})",
                    self.id,
                    header.seq,
                    self.recv_ack
                );
                if self.reack_duplicates {
                    self.send_ack(io);
                }
            }
        }

        if header.flags.is_ack() && !self.in_flight.is_empty() {
            self.on_ack(header.ack, io);
        }
    }

    /// Process a cumulative acknowledgment number.
    fn on_ack(&mut self, ack: u32, io: &mut Io<'_>) {
        let acked = ack.wrapping_sub(self.send_seq) as usize;
        let limit = self.in_flight.len();
        if acked == 0 || acked > limit {
            log::trace!("{}: ignoring ack {ack} outside ({}, +{limit}]", self.id, self.send_seq);
            return;
        }

        if acked == limit {
            self.on_batch_acked(io);
        } else {
            self.on_partial_ack(acked, io);
        }
    }

    /// The whole outstanding batch was acknowledged.
    fn on_batch_acked(&mut self, io: &mut Io<'_>) {
        io.timers.cancel(&self.id);

        if let Some(sample) = self.sampler.take_sample(io.now) {
            self.rtt.update(sample);
            log::debug!(
                "{}: rtt sample {:?}, rto now {:?}",
                self.id,
                sample,
                self.rtt.rto()
            );
        }

        if self.window.on_batch_acked(self.retry_count > 0) {
            log::debug!("{}: window grew to {}", self.id, self.window.segments());
        }

        self.send_seq = self.next_seq();
        self.in_flight.clear();
        self.retry_count = 0;

        if !self.unsent.is_empty() {
            self.send_batch(io);
        } else if self.fin_queued {
            self.send_fin(io);
        }
    }

    /// Only the first `acked` bytes of the batch were acknowledged.
    fn on_partial_ack(&mut self, acked: usize, io: &mut Io<'_>) {
        self.in_flight.drain(..acked);
        self.send_seq = self.send_seq.wrapping_add(acked as u32);

        if self.retry_count > 0 {
            // Already degraded to single-segment mode: chain the next one.
            self.retransmit_front(io);
        } else {
            self.arm_timer(io);
        }
    }

    // -------------------------------------------------------------------------
    // Send path
    // -------------------------------------------------------------------------

    /// Queue application data, sending right away if nothing is outstanding.
    pub(crate) fn send(&mut self, data: &[u8], io: &mut Io<'_>) -> TransportResult<()> {
        if self.close_state != CloseState::Open {
            return Err(TransportError::ConnectionClosed);
        }
        self.unsent.extend_from_slice(data);
        if self.in_flight.is_empty() && !self.syn_pending {
            self.send_batch(io);
        }
        Ok(())
    }

    /// Move up to one window of unsent bytes onto the wire, back to back.
    fn send_batch(&mut self, io: &mut Io<'_>) {
        debug_assert!(self.in_flight.is_empty());
        let take = self.unsent.len().min(self.window.bytes(self.mss));
        if take == 0 {
            return;
        }

        let batch: Vec<u8> = self.unsent.drain(..take).collect();
        let mut seq = self.send_seq;
        for chunk in batch.chunks(self.mss) {
            self.transmit(seq, SegmentFlags::ACK, chunk, io);
            seq = seq.wrapping_add(chunk.len() as u32);
        }
        self.in_flight = batch;

        self.window.on_batch_sent(take, self.mss);
        self.sampler.on_send(io.now);
        self.arm_timer(io);
        log::trace!(
            "{}: sent batch of {take} bytes from seq {} (window {})",
            self.id,
            self.send_seq,
            self.window.segments()
        );

    }

    /// Retransmission timer fired.
    pub(crate) fn on_timeout(&mut self, io: &mut Io<'_>) -> TransportResult<()> {
        if self.in_flight.is_empty() && !self.syn_pending {
            // Everything was acknowledged after this timer was armed.
            return Ok(());
        }

        self.retry_count += 1;
        if let Some(max) = self.max_retransmits {
            if self.retry_count > max {
                return Err(TransportError::MaxRetransmitsExceeded);
            }
        }

        if self.syn_pending {
            log::debug!("{}: SYN timeout #{}", self.id, self.retry_count);
            self.open(io);
            return Ok(());
        }

        self.window.on_timeout();
        log::debug!(
            "{}: timeout #{}, window shrank to {}",
            self.id,
            self.retry_count,
            self.window.segments()
        );
        self.retransmit_front(io);
        Ok(())
    }

    /// Resend the earliest unacknowledged segment at its original sequence.
    fn retransmit_front(&mut self, io: &mut Io<'_>) {
        self.sampler.invalidate();
        let len = self.in_flight.len().min(self.mss);
        if len > 0 {
            self.transmit(self.send_seq, SegmentFlags::ACK, &self.in_flight[..len], io);
        }
        self.arm_timer(io);
    }

    fn arm_timer(&self, io: &mut Io<'_>) {
        io.timers.arm(self.id, io.now + self.rtt.rto());
    }

    // -------------------------------------------------------------------------
    // Output helpers
    // -------------------------------------------------------------------------

    fn send_ack(&self, io: &mut Io<'_>) {
        self.transmit(self.next_seq(), SegmentFlags::ACK, &[], io);
    }

    fn transmit(&self, seq: u32, flags: SegmentFlags, payload: &[u8], io: &mut Io<'_>) {
        let header = SegmentHeader::new(self.id.dst_port, self.id.src_port, seq, self.recv_ack, flags);
        let segment = header.encode(payload, self.id.dst_addr, self.id.src_addr);
        log::trace!(
            "{}: -> {:?} seq={} ack={} len={}",
            self.id,
            flags,
            seq,
            self.recv_ack,
            payload.len()
        );
        io.network.send(segment, self.id.src_addr);
    }

    fn deliver(&mut self, payload: &[u8]) {
        match self.sink.as_mut() {
            Some(sink) => sink.on_data(self.id, payload),
            None => log::debug!("{}: no data handler, {} bytes dropped", self.id, payload.len()),
        }
    }

    fn notify_close(&mut self, side: HalfClose) {
        if let Some(sink) = self.sink.as_mut() {
            sink.on_close(self.id, side);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("send_seq", &self.send_seq)
            .field("recv_ack", &self.recv_ack)
            .field("unsent", &self.unsent.len())
            .field("in_flight", &self.in_flight.len())
            .field("window", &self.window.segments())
            .field("rto", &self.rtt.rto())
            .field("retry_count", &self.retry_count)
            .field("close_state", &self.close_state)
            .field("fin_queued", &self.fin_queued)
            .field("established", &!self.syn_pending)
            .finish_non_exhaustive()
    }
}
