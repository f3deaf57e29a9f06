//! Internet checksum (RFC 1071) over a segment and its pseudo-header.

use std::net::IpAddr;

use crate::core::constants::PROTOCOL_NUMBER;

/// Byte offset of the checksum field inside the segment header.
pub(crate) const CHECKSUM_OFFSET: usize = 16;

/// Running ones-complement sum of 16-bit big-endian words.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: u32,
}

impl Accumulator {
    fn add_bytes(&mut self, data: &[u8]) {
        let mut chunks = data.chunks_exact(2);
        for word in &mut chunks {
            self.sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
            // Keep the carry folded so long inputs cannot overflow.
            self.sum = (self.sum & 0xffff) + (self.sum >> 16);
        }
        // Odd trailing byte is padded with zero on the right.
        if let [last] = chunks.remainder() {
            self.sum += u32::from(*last) << 8;
        }
        self.fold();
    }

    fn fold(&mut self) {
        while self.sum >> 16 != 0 {
            self.sum = (self.sum & 0xffff) + (self.sum >> 16);
        }
    }

    fn finish(mut self) -> u16 {
        self.fold();
        !(self.sum as u16)
    }
}

/// Compute the checksum of `segment` as sent from `src` to `dst`.
///
/// The checksum field inside `segment` is included as-is, so a segment whose
/// field already holds the right value sums to zero. Returns `None` when the
/// two addresses are of different families.
pub fn segment_checksum(src: IpAddr, dst: IpAddr, segment: &[u8]) -> Option<u16> {
    let mut acc = Accumulator::default();
    match (src, dst) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            acc.add_bytes(&src.octets());
            acc.add_bytes(&dst.octets());
            acc.add_bytes(&[0, PROTOCOL_NUMBER]);
            acc.add_bytes(&(segment.len() as u16).to_be_bytes());
        }
        (IpAddr::V6(src), IpAddr::V6(dst)) => {
            acc.add_bytes(&src.octets());
            acc.add_bytes(&dst.octets());
            acc.add_bytes(&(segment.len() as u32).to_be_bytes());
            acc.add_bytes(&[0, 0, 0, PROTOCOL_NUMBER]);
        }
        _ => return None,
    }
    acc.add_bytes(segment);
    Some(acc.finish())
}

/// Write the correct checksum into an encoded segment.
///
/// Segments between mixed address families keep a zero checksum; they can
/// only be accepted by a receiver that ignores checksums.
pub fn fill_checksum(segment: &mut [u8], src: IpAddr, dst: IpAddr) {
    if segment.len() < CHECKSUM_OFFSET + 2 {
        return;
    }
    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&[0, 0]);
    if let Some(csum) = segment_checksum(src, dst, segment) {
        segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&csum.to_be_bytes());
    }
}

/// Check a received segment against its pseudo-header.
pub fn verify_checksum(segment: &[u8], src: IpAddr, dst: IpAddr) -> bool {
    segment_checksum(src, dst, segment) == Some(0)
}
