//! RTT estimation and retransmission timeout.
//!
//! Jacobson/Karels smoothing with Karn's rule: samples are only taken for
//! batches that were never retransmitted.

use std::time::{Duration, Instant};

/// RTT timing constants.
pub mod constants {
    /// Alpha for SRTT smoothing (0.125 = 1/8).
    pub const SRTT_ALPHA: f64 = 0.125;

    /// Beta for RTTVAR smoothing (0.25 = 1/4).
    pub const RTTVAR_BETA: f64 = 0.25;

    /// K multiplier for RTO calculation.
    pub const RTO_K: f64 = 4.0;
}

/// RTT estimator.
///
/// Maintains smoothed RTT and RTT deviation (in seconds) and derives the
/// retransmission timeout `RTO = SRTT + 4 * RTTVAR`.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT in seconds.
    srtt: f64,
    /// RTT deviation in seconds.
    rttvar: f64,
    /// Current retransmission timeout.
    rto: Duration,
    /// Whether we've received the first RTT sample.
    initialized: bool,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(crate::core::constants::INITIAL_RTO)
    }
}

impl RttEstimator {
    /// Create an estimator that uses `initial_rto` until the first sample.
    pub fn new(initial_rto: Duration) -> Self {
        Self {
            srtt: 0.0,
            rttvar: 0.0,
            rto: initial_rto,
            initialized: false,
        }
    }

    /// Update the estimate with a new sample.
    ///
    /// - First sample: SRTT = R, RTTVAR = R / 2
    /// - Subsequent: SRTT = 0.875 * SRTT + 0.125 * R, then
    ///   RTTVAR = 0.75 * RTTVAR + 0.25 * |R - SRTT|
    pub fn update(&mut self, sample: Duration) {
        let sample = sample.as_secs_f64();

        if !self.initialized {
            self.srtt = sample;
            self.rttvar = sample / 2.0;
            self.initialized = true;
        } else {
            self.srtt = (1.0 - constants::SRTT_ALPHA) * self.srtt + constants::SRTT_ALPHA * sample;
            // Deviation is measured against the already-updated SRTT.
            self.rttvar = (1.0 - constants::RTTVAR_BETA) * self.rttvar
                + constants::RTTVAR_BETA * (sample - self.srtt).abs();
        }

        self.rto = Duration::from_secs_f64(self.srtt + constants::RTO_K * self.rttvar);
    }

    /// Get the smoothed RTT in seconds.
    pub fn srtt_secs(&self) -> f64 {
        self.srtt
    }

    /// Get the RTT deviation in seconds.
    pub fn rttvar_secs(&self) -> f64 {
        self.rttvar
    }

    /// Get the current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Check if the estimator has been initialized with at least one sample.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Tracks when the current send batch left, for RTT sampling.
///
/// A retransmission makes the eventual ACK ambiguous, so it clears the
/// pending timestamp and the batch yields no sample.
#[derive(Debug, Clone, Default)]
pub struct RttSampler {
    /// When the outstanding batch was transmitted.
    pending_since: Option<Instant>,
}

impl RttSampler {
    /// Create an idle sampler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a fresh batch was transmitted at `now`.
    pub fn on_send(&mut self, now: Instant) {
        self.pending_since = Some(now);
    }

    /// Discard the pending timestamp (e.g., on retransmission).
    pub fn invalidate(&mut self) {
        self.pending_since = None;
    }

    /// Take the sample for a batch acknowledged at `now`, if still valid.
    pub fn take_sample(&mut self, now: Instant) -> Option<Duration> {
        self.pending_since
            .take()
            .map(|sent| now.saturating_duration_since(sent))
    }

    /// Check if a sample is pending.
    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }
}
