//! Reliable transport state machines.
//!
//! Everything here is sans-IO: callers pass the current [`Instant`] and a
//! [`Network`](crate::core::Network) to send through, and drive
//! retransmissions with [`Demultiplexer::poll_timers`]. The
//! [`server`](crate::server) module wraps this in a tokio event loop.
//!
//! - **Routing**: [`Demultiplexer`] maps segments to connections by 4-tuple
//! - **Connections**: [`Connection`] handles handshake, windows, ACKs, close
//! - **RTT estimation**: [`RttEstimator`] with Karn's rule via [`RttSampler`]
//! - **Congestion**: [`CongestionWindow`], additive increase and halving
//! - **Timers**: [`RetransmitTimers`], one deadline per connection
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Application  (DataSink)            │
//! ├─────────────────────────────────────────┤
//! │  Demultiplexer ─▶ Connection            │  ← This module
//! │   timers, RTT, congestion window        │
//! ├─────────────────────────────────────────┤
//! │      Segment codec  (wire)              │
//! ├─────────────────────────────────────────┤
//! │      Datagram network  (Network)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! [`Instant`]: std::time::Instant

mod config;
mod congestion;
mod connection;
mod demux;
mod timer;
mod timing;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{TransportConfig, TransportConfigBuilder};
pub use congestion::CongestionWindow;
pub use connection::{CloseState, Connection, ConnectionId};
pub use demux::Demultiplexer;
pub use timer::RetransmitTimers;
pub use timing::{RttEstimator, RttSampler, constants as timing_constants};
