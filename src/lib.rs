//! # reliable-transport
//!
//! A small TCP-like transport: reliable, ordered byte streams on top of a
//! best-effort datagram network that may drop, corrupt or reorder segments.
//!
//! - **Handshake**: SYN / SYN|ACK with random initial sequence numbers
//! - **Reliability**: cumulative ACKs, timeout-driven retransmission
//! - **Adaptivity**: RTT-estimated timeouts, additive-increase window
//! - **Integrity**: RFC 1071 checksum over an IPv4 or IPv6 pseudo-header
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio server that drives the core over UDP
//!
//! ## Modules
//!
//! - [`core`]: constants, errors and collaborator traits
//! - [`wire`]: segment header codec and checksum
//! - [`transport`]: sans-IO connection and demultiplexer state machines
//! - [`server`]: async server (requires `runtime` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::net::IpAddr;
//! use std::time::Instant;
//!
//! use reliable_transport::prelude::*;
//!
//! struct Discard;
//!
//! impl Network for Discard {
//!     fn send(&mut self, _segment: Vec<u8>, _dest: IpAddr) {}
//! }
//!
//! let config = TransportConfig::builder().listen_port(7000).build();
//! let mut demux = Demultiplexer::new(config, Discard);
//! demux.on_accept(|conn| {
//!     println!("new connection {}", conn.id());
//! });
//!
//! // Feed segments from the network and fire due timers.
//! demux.poll_timers(Instant::now());
//! assert!(demux.is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;
pub mod transport;
pub mod wire;

// Async server (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::transport::{
        CloseState, Connection, ConnectionId, Demultiplexer, TransportConfig, TransportConfigBuilder,
    };

    #[cfg(feature = "runtime")]
    pub use crate::server::{ConnectionHandle, ServerConfig, ServerEvent, TransportServer};
}

// Re-export commonly used items at crate root
pub use core::{DataSink, HalfClose, Network, TransportError, TransportResult};
pub use transport::{Connection, ConnectionId, Demultiplexer, TransportConfig};
