//! Engine and per-peer configuration.

use std::time::Duration;

use crate::app::{clamp_window, MaxApduSize, MaxSegments};
use crate::object::Segmentation;

/// Default APDU timeout (clause 12.11.27)
pub const DEFAULT_APDU_TIMEOUT: Duration = Duration::from_millis(6000);

/// Default number of APDU retries (clause 12.11.28)
pub const DEFAULT_APDU_RETRIES: u8 = 3;

/// Default segment timeout (clause 12.11.26)
pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default segmentation window.
pub const DEFAULT_WINDOW_SIZE: u8 = 4;

/// What the engine knows about one remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerConfig {
    /// Largest APDU the peer accepts.
    pub max_apdu_length_accepted: MaxApduSize,
    pub segmentation_supported: Segmentation,
    pub max_segments_accepted: MaxSegments,
    /// Time to wait for a response before retrying.
    pub apdu_timeout: Duration,
    pub number_of_apdu_retries: u8,
    /// Window proposed when sending segments to the peer.
    pub window_size: u8,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_apdu_length_accepted: MaxApduSize::Up1476,
            segmentation_supported: Segmentation::Both,
            max_segments_accepted: MaxSegments::Unspecified,
            apdu_timeout: DEFAULT_APDU_TIMEOUT,
            number_of_apdu_retries: DEFAULT_APDU_RETRIES,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl PeerConfig {
    pub fn with_max_apdu(mut self, max_apdu: MaxApduSize) -> Self {
        self.max_apdu_length_accepted = max_apdu;
        self
    }

    pub fn with_segmentation(mut self, segmentation: Segmentation) -> Self {
        self.segmentation_supported = segmentation;
        self
    }

    pub fn with_max_segments(mut self, max_segments: MaxSegments) -> Self {
        self.max_segments_accepted = max_segments;
        self
    }

    pub fn with_apdu_timeout(mut self, timeout: Duration) -> Self {
        self.apdu_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.number_of_apdu_retries = retries;
        self
    }

    pub fn with_window_size(mut self, window_size: u8) -> Self {
        self.window_size = clamp_window(window_size);
        self
    }

    /// Time a response stays cached for duplicate detection: one timeout
    /// per attempt the requester may make.
    pub fn exchange_lifetime(&self) -> Duration {
        self.apdu_timeout * (u32::from(self.number_of_apdu_retries) + 1)
    }
}

/// Transport engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Largest APDU this device accepts.
    pub max_apdu_length_accepted: MaxApduSize,
    pub max_segments_accepted: MaxSegments,
    pub segmentation_supported: Segmentation,
    /// Most segments accepted per window when receiving.
    pub window_size: u8,
    /// Time to wait for the next segment or Segment-ACK.
    pub segment_timeout: Duration,
    /// Overrides [`PeerConfig::exchange_lifetime`] for cached responses.
    pub response_cache_ttl: Option<Duration>,
    /// Used for peers without an explicit [`PeerConfig`].
    pub default_peer: PeerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_apdu_length_accepted: MaxApduSize::Up1476,
            max_segments_accepted: MaxSegments::SixtyFour,
            segmentation_supported: Segmentation::Both,
            window_size: DEFAULT_WINDOW_SIZE,
            segment_timeout: DEFAULT_SEGMENT_TIMEOUT,
            response_cache_ttl: None,
            default_peer: PeerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_apdu(mut self, max_apdu: MaxApduSize) -> Self {
        self.max_apdu_length_accepted = max_apdu;
        self
    }

    pub fn with_max_segments(mut self, max_segments: MaxSegments) -> Self {
        self.max_segments_accepted = max_segments;
        self
    }

    pub fn with_segmentation(mut self, segmentation: Segmentation) -> Self {
        self.segmentation_supported = segmentation;
        self
    }

    pub fn with_window_size(mut self, window_size: u8) -> Self {
        self.window_size = clamp_window(window_size);
        self
    }

    pub fn with_segment_timeout(mut self, timeout: Duration) -> Self {
        self.segment_timeout = timeout;
        self
    }

    pub fn with_response_cache_ttl(mut self, ttl: Duration) -> Self {
        self.response_cache_ttl = Some(ttl);
        self
    }

    pub fn with_default_peer(mut self, peer: PeerConfig) -> Self {
        self.default_peer = peer;
        self
    }

    /// How long a response to `peer` stays cached.
    pub fn cache_ttl(&self, peer: &PeerConfig) -> Duration {
        self.response_cache_ttl
            .unwrap_or_else(|| peer.exchange_lifetime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_peer.apdu_timeout, Duration::from_secs(6));
        assert_eq!(config.default_peer.number_of_apdu_retries, 3);
        assert_eq!(config.segment_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_ttl(&config.default_peer), Duration::from_secs(24));
    }

    #[test]
    fn test_builders() {
        let peer = PeerConfig::default()
            .with_max_apdu(MaxApduSize::Up50)
            .with_retries(0)
            .with_window_size(200)
            .with_apdu_timeout(Duration::from_millis(500));
        assert_eq!(peer.window_size, 127);
        assert_eq!(peer.exchange_lifetime(), Duration::from_millis(500));

        let config = EngineConfig::default()
            .with_window_size(0)
            .with_response_cache_ttl(Duration::from_secs(1));
        assert_eq!(config.window_size, 1);
        assert_eq!(config.cache_ttl(&peer), Duration::from_secs(1));
    }
}
