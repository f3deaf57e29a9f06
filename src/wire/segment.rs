//! Segment header encoding and decoding.
//!
//! Wire format (20 bytes, big-endian), followed by the payload:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Words |         Flags         |            Window             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |        Urgent Pointer         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The payload starts `4 * Words` bytes into the segment.

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

use super::checksum::fill_checksum;
use crate::core::constants::{
    ADVERTISED_WINDOW, FLAG_ACK, FLAG_FIN, FLAG_RST, FLAG_SYN, HEADER_LEN, HEADER_WORDS,
};

/// Mask of the flag bits inside the offset/flags word.
const FLAGS_MASK: u16 = 0x0fff;

/// Control flags of a segment.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentFlags(u16);

impl SegmentFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Sender is done sending.
    pub const FIN: Self = Self(FLAG_FIN);
    /// New-connection request.
    pub const SYN: Self = Self(FLAG_SYN);
    /// Reserved reset bit.
    pub const RST: Self = Self(FLAG_RST);
    /// Acknowledgment number is valid.
    pub const ACK: Self = Self(FLAG_ACK);

    /// Create flags from the raw bits (offset nibble is discarded).
    pub fn from_bits(bits: u16) -> Self {
        Self(bits & FLAGS_MASK)
    }

    /// Get the raw bits.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Check whether every flag in `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if SYN is set.
    pub fn is_syn(self) -> bool {
        self.contains(Self::SYN)
    }

    /// Check if ACK is set.
    pub fn is_ack(self) -> bool {
        self.contains(Self::ACK)
    }

    /// Check if FIN is set.
    pub fn is_fin(self) -> bool {
        self.contains(Self::FIN)
    }
}

impl std::ops::BitOr for SegmentFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::SYN, "SYN"),
            (Self::ACK, "ACK"),
            (Self::FIN, "FIN"),
            (Self::RST, "RST"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Fixed segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Sender's port.
    pub src_port: u16,
    /// Receiver's port.
    pub dst_port: u16,
    /// Sequence number of the first payload byte (or of SYN/FIN).
    pub seq: u32,
    /// Next sequence number expected from the receiver of this segment.
    pub ack: u32,
    /// Control flags.
    pub flags: SegmentFlags,
    /// Advertised receive window.
    pub window: u16,
    /// Checksum as carried on the wire.
    pub checksum: u16,
    /// Urgent pointer, unused.
    pub urgent: u16,
}

impl SegmentHeader {
    /// Create a header with the default window and zero checksum.
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: SegmentFlags) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window: ADVERTISED_WINDOW,
            checksum: 0,
            urgent: 0,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ack.to_be_bytes());
        let offset_flags = (HEADER_WORDS << 12) | self.flags.bits();
        buf[12..14].copy_from_slice(&offset_flags.to_be_bytes());
        buf[14..16].copy_from_slice(&self.window.to_be_bytes());
        buf[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        buf[18..20].copy_from_slice(&self.urgent.to_be_bytes());
        buf
    }

    /// Encode header and payload, computing the checksum for `src -> dst`.
    pub fn encode(&self, payload: &[u8], src: IpAddr, dst: IpAddr) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&self.to_bytes());
        buf.extend_from_slice(payload);
        fill_checksum(&mut buf, src, dst);
        buf
    }
}

/// Errors that can occur during segment parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// Buffer cannot hold the fixed header.
    #[error("segment too short: expected at least 20 bytes, got {actual}")]
    TooShort {
        /// Actual size received.
        actual: usize,
    },

    /// Header length field is below the minimum or past the buffer end.
    #[error("bad header length: {words} words for a {actual}-byte segment")]
    BadHeaderLength {
        /// Header length in 32-bit words.
        words: u8,
        /// Actual size received.
        actual: usize,
    },
}

/// Parse a raw segment into its header and payload.
///
/// Does not verify the checksum; see
/// [`verify_checksum`](super::verify_checksum).
pub fn parse_segment(data: &[u8]) -> Result<(SegmentHeader, &[u8]), SegmentError> {
    if data.len() < HEADER_LEN {
        return Err(SegmentError::TooShort { actual: data.len() });
    }

    let word = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]);
    let long = |at: usize| u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);

    let offset_flags = word(12);
    let words = (offset_flags >> 12) as u8;
    let header_len = 4 * words as usize;
    if words < HEADER_WORDS as u8 || header_len > data.len() {
        return Err(SegmentError::BadHeaderLength {
            words,
            actual: data.len(),
        });
    }

    let header = SegmentHeader {
        src_port: word(0),
        dst_port: word(2),
        seq: long(4),
        ack: long(8),
        flags: SegmentFlags::from_bits(offset_flags),
        window: word(14),
        checksum: word(16),
        urgent: word(18),
    };

    Ok((header, &data[header_len..]))
}
