//! Protocol constants.
//!
//! Wire sizes and flag bits are fixed by the segment format and MUST NOT be
//! changed. Timing and window defaults can be overridden through
//! [`TransportConfig`](crate::transport::TransportConfig).

use std::time::Duration;

// =============================================================================
// SEGMENT FORMAT
// =============================================================================

/// Size of the fixed segment header (five 32-bit words).
pub const HEADER_LEN: usize = 20;

/// Header length in 32-bit words, as written into the offset/flags field.
pub const HEADER_WORDS: u16 = (HEADER_LEN / 4) as u16;

/// IP protocol number used in the checksum pseudo-header.
pub const PROTOCOL_NUMBER: u8 = 6;

/// Advertised receive window. Receive-side flow control is not modelled.
pub const ADVERTISED_WINDOW: u16 = u16::MAX;

// =============================================================================
// FLAG BITS (low bits of the offset/flags word)
// =============================================================================

/// Sender has no more data.
pub const FLAG_FIN: u16 = 0x01;

/// New-connection request.
pub const FLAG_SYN: u16 = 0x02;

/// Reserved. Parsed but never emitted.
pub const FLAG_RST: u16 = 0x04;

/// Acknowledgment number is valid.
pub const FLAG_ACK: u16 = 0x10;

// =============================================================================
// TRANSPORT DEFAULTS
// =============================================================================

/// Default maximum segment payload size.
pub const DEFAULT_MSS: usize = 1460;

/// Largest payload whose segment length fits the 16-bit pseudo-header field.
pub const MAX_MSS: usize = u16::MAX as usize - HEADER_LEN;

/// Retransmission timeout before the first RTT sample.
pub const INITIAL_RTO: Duration = Duration::from_millis(500);

/// Congestion window (in segments) of a freshly accepted connection.
pub const INITIAL_WINDOW: usize = 1;

/// Largest initial sequence number picked for a new connection.
pub const MAX_INITIAL_SEQ: u32 = 0xffff;
