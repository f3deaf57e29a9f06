//! Congestion window in whole segments.
//!
//! Additive increase by one segment per fully acknowledged, full-sized
//! window; multiplicative decrease (halving, rounded up) on every
//! retransmission timeout. The window never drops below one segment.

/// Congestion window sized in MSS units.
#[derive(Debug, Clone)]
pub struct CongestionWindow {
    /// Segments allowed in flight.
    segments: usize,
    /// Whether the outstanding batch filled the window exactly.
    batch_filled: bool,
}

impl CongestionWindow {
    /// Create a window of `initial` segments (at least one).
    pub fn new(initial: usize) -> Self {
        Self {
            segments: initial.max(1),
            batch_filled: false,
        }
    }

    /// Segments allowed in flight.
    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Bytes allowed in flight for the given MSS.
    pub fn bytes(&self, mss: usize) -> usize {
        self.segments * mss
    }

    /// Record the size of a freshly transmitted batch.
    ///
    /// Only a batch of exactly `segments * mss` bytes qualifies the window
    /// for growth when it is acknowledged.
    pub fn on_batch_sent(&mut self, batch_bytes: usize, mss: usize) {
        self.batch_filled = batch_bytes == self.bytes(mss);
    }

    /// A whole batch was acknowledged.
    ///
    /// Grows by one segment if the batch filled the window and no timeout
    /// touched it. Returns `true` if the window grew.
    pub fn on_batch_acked(&mut self, retransmitted: bool) -> bool {
        let grow = self.batch_filled && !retransmitted;
        self.batch_filled = false;
        if grow {
            self.segments += 1;
        }
        grow
    }

    /// A retransmission timeout fired: halve, rounding up, floored at one.
    pub fn on_timeout(&mut self) {
        self.segments = self.segments.div_ceil(2).max(1);
        self.batch_filled = false;
    }
}
