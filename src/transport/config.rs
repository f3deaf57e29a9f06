//! Transport configuration.

use std::time::Duration;

use crate::core::constants::{DEFAULT_MSS, INITIAL_RTO, INITIAL_WINDOW, MAX_MSS};

/// Settings shared by every connection of one [`Demultiplexer`](super::Demultiplexer).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port segments must be addressed to.
    pub listen_port: u16,

    /// Maximum payload bytes per segment.
    pub mss: usize,

    /// Retransmission timeout before the first RTT sample.
    pub initial_rto: Duration,

    /// Congestion window of a new connection, in segments.
    pub initial_window: usize,

    /// Consecutive timeouts tolerated before the connection is reset.
    ///
    /// `None` retries forever.
    pub max_retransmits: Option<u32>,

    /// Accept segments without verifying their checksum.
    pub ignore_checksum: bool,

    /// Answer a dropped data segment with the current cumulative ACK.
    ///
    /// Off by default: out-of-order and duplicate segments are discarded
    /// silently and the sender recovers through its own timeout. Turning it
    /// on lets a sender whose ACK was lost make progress.
    pub reack_duplicates: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_port: 7000,
            mss: DEFAULT_MSS,
            initial_rto: INITIAL_RTO,
            initial_window: INITIAL_WINDOW,
            max_retransmits: None,
            ignore_checksum: false,
            reack_duplicates: false,
        }
    }
}

impl TransportConfig {
    /// Start building a configuration.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
        }
    }

    /// Set the listening port.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = port;
        self
    }

    /// Set the maximum segment size, clamped to `1..=MAX_MSS`.
    pub fn mss(mut self, mss: usize) -> Self {
        self.config.mss = mss.clamp(1, MAX_MSS);
        self
    }

    /// Set the initial retransmission timeout.
    pub fn initial_rto(mut self, rto: Duration) -> Self {
        self.config.initial_rto = rto;
        self
    }

    /// Set the initial congestion window (at least one segment).
    pub fn initial_window(mut self, segments: usize) -> Self {
        self.config.initial_window = segments.max(1);
        self
    }

    /// Bound consecutive retransmission timeouts.
    pub fn max_retransmits(mut self, max: u32) -> Self {
        self.config.max_retransmits = Some(max);
        self
    }

    /// Skip checksum validation on inbound segments.
    pub fn ignore_checksum(mut self, ignore: bool) -> Self {
        self.config.ignore_checksum = ignore;
        self
    }

    /// Re-send the cumulative ACK when a data segment is dropped.
    pub fn reack_duplicates(mut self, enabled: bool) -> Self {
        self.config.reack_duplicates = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}
