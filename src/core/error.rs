//! Error types for the reliable transport.
//!
//! Most network-side failures never reach the application: the
//! [`Demultiplexer`](crate::transport::Demultiplexer) logs and drops them.
//! [`TransportError::is_silent_drop`] marks exactly those.

use std::io;

use thiserror::Error;

use crate::wire::SegmentError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Segment could not be decoded.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// I/O error on the link socket.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Checksum over pseudo-header and segment did not verify.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Destination port is not the listening port.
    #[error("segment for port {port} is not ours")]
    MisdirectedSegment {
        /// Destination port carried by the segment.
        port: u16,
    },

    /// No connection exists for the given identity.
    #[error("unknown connection")]
    UnknownConnection,

    /// The application already closed this connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The retransmission bound was reached without progress.
    #[error("max retransmits exceeded")]
    MaxRetransmitsExceeded,

    /// The runtime task is gone.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Check if this error is dropped without any response or upcall.
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            TransportError::Segment(_)
                | TransportError::ChecksumMismatch
                | TransportError::MisdirectedSegment { .. }
        )
    }

    /// Check if this error tears the connection down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::MaxRetransmitsExceeded | TransportError::Shutdown
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
