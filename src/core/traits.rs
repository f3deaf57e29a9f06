//! Seams between the transport and its collaborators.
//!
//! The transport sits between two layers it does not own:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Application  (DataSink)          │
//! ├─────────────────────────────────────────┤
//! │         Reliable transport              │
//! ├─────────────────────────────────────────┤
//! │     Datagram network  (Network)         │
//! └─────────────────────────────────────────┘
//! ```

use std::net::IpAddr;

use super::error::TransportError;
use crate::transport::ConnectionId;

/// Best-effort datagram network layer.
///
/// Sends are fire-and-forget: the network may drop, duplicate or reorder
/// anything handed to it.
pub trait Network {
    /// Transmit an encoded segment (header, payload, checksum) to `dest`.
    fn send(&mut self, segment: Vec<u8>, dest: IpAddr);
}

impl<N: Network + ?Sized> Network for &mut N {
    fn send(&mut self, segment: Vec<u8>, dest: IpAddr) {
        (**self).send(segment, dest)
    }
}

/// Which side ended its half of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfClose {
    /// The local application called `close`.
    Local,
    /// The peer sent FIN.
    Remote,
}

/// Receiver of in-order stream data for one connection.
///
/// Registered per connection with
/// [`Connection::register_data_handler`](crate::transport::Connection::register_data_handler).
pub trait DataSink: Send {
    /// Deliver an in-order, non-empty payload.
    fn on_data(&mut self, id: ConnectionId, data: &[u8]);

    /// Signal that one side of the stream closed. Fired once per side.
    fn on_close(&mut self, id: ConnectionId, side: HalfClose);

    /// The connection was torn down without a close handshake.
    fn on_reset(&mut self, id: ConnectionId, reason: &TransportError) {
        let _ = (id, reason);
    }
}
