//! Segment wire format.
//!
//! Pure data transformation: nothing here performs I/O or keeps state.

mod checksum;
mod segment;

pub use checksum::{fill_checksum, segment_checksum, verify_checksum};
pub use segment::{SegmentError, SegmentFlags, SegmentHeader, parse_segment};
