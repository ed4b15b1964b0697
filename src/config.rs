//! Runtime options.
//!
//! Defaults follow the protocol timing constants in [`crate::core`].
//! Options are plain structs with `with_*` setters.

use std::time::Duration;

use crate::core::{
    DEFAULT_NONCE_TIMEOUT, DEFAULT_PARTIAL_SESSION_TIMEOUT, MAX_SEGMENT_SIZE, NodeId,
    RELAXED_TIMING_DELAY_R2, RELAXED_TIMING_DELAY_R3, RELAXED_TIMING_THRESHOLD,
    REQUEST_MISSING_SEGMENT_R2, REQUEST_MISSING_SEGMENT_R3, SEGMENT_COMPLETE_R2,
    SEGMENT_COMPLETE_R3,
};

/// Options for the S0 security manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityOptions {
    /// Lifetime of a nonce before it is purged.
    pub nonce_timeout: Duration,
    /// How many peer-issued nonces are kept per node.
    pub max_free_nonces_per_peer: usize,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            nonce_timeout: DEFAULT_NONCE_TIMEOUT,
            max_free_nonces_per_peer: 1,
        }
    }
}

impl SecurityOptions {
    /// Set the nonce lifetime.
    pub fn with_nonce_timeout(mut self, timeout: Duration) -> Self {
        self.nonce_timeout = timeout;
        self
    }

    /// Set how many peer-issued nonces are retained per node.
    pub fn with_max_free_nonces_per_peer(mut self, max: usize) -> Self {
        self.max_free_nonces_per_peer = max.max(1);
        self
    }
}

/// Transport Service protocol version, which selects the timing constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportServiceVersion {
    /// Version 2.
    V2,
    /// Version 3 and later.
    #[default]
    V3,
}

/// Timing of the Transport Service exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportServiceTiming {
    /// Wait before requesting a missing segment.
    pub request_missing_segment: Duration,
    /// Wait for Segment Complete after sending the last segment.
    pub segment_complete: Duration,
    /// Delay between segments once relaxed timing applies.
    pub relaxed_timing_delay: Duration,
}

impl TransportServiceTiming {
    /// Timing constants for a protocol version.
    pub fn for_version(version: TransportServiceVersion) -> Self {
        match version {
            TransportServiceVersion::V2 => Self {
                request_missing_segment: REQUEST_MISSING_SEGMENT_R2,
                segment_complete: SEGMENT_COMPLETE_R2,
                relaxed_timing_delay: RELAXED_TIMING_DELAY_R2,
            },
            TransportServiceVersion::V3 => Self {
                request_missing_segment: REQUEST_MISSING_SEGMENT_R3,
                segment_complete: SEGMENT_COMPLETE_R3,
                relaxed_timing_delay: RELAXED_TIMING_DELAY_R3,
            },
        }
    }
}

/// Options for Transport Service segmentation and reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportServiceOptions {
    /// Maximum datagram bytes per segment.
    pub max_segment_size: usize,
    /// Abandon a reassembly session after this long without progress.
    pub session_timeout: Duration,
    /// Protocol version of the peer.
    pub version: TransportServiceVersion,
    /// Queue length above which the relaxed inter-segment delay applies.
    pub relaxed_timing_threshold: usize,
}

impl Default for TransportServiceOptions {
    fn default() -> Self {
        Self {
            max_segment_size: MAX_SEGMENT_SIZE,
            session_timeout: DEFAULT_PARTIAL_SESSION_TIMEOUT,
            version: TransportServiceVersion::default(),
            relaxed_timing_threshold: RELAXED_TIMING_THRESHOLD,
        }
    }
}

impl TransportServiceOptions {
    /// Set the maximum segment size (clamped to the protocol maximum).
    pub fn with_max_segment_size(mut self, size: usize) -> Self {
        self.max_segment_size = size.clamp(1, MAX_SEGMENT_SIZE);
        self
    }

    /// Set the reassembly session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the protocol version.
    pub fn with_version(mut self, version: TransportServiceVersion) -> Self {
        self.version = version;
        self
    }

    /// Timing constants for the configured version.
    pub fn timing(&self) -> TransportServiceTiming {
        TransportServiceTiming::for_version(self.version)
    }
}

/// Options for the receive pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    /// Node id of the controller running this stack.
    pub own_node_id: NodeId,
    /// Security options.
    pub security: SecurityOptions,
    /// Transport Service options.
    pub transport_service: TransportServiceOptions,
}

impl DriverOptions {
    /// Create options for a controller node.
    pub fn new(own_node_id: NodeId) -> Self {
        Self {
            own_node_id,
            security: SecurityOptions::default(),
            transport_service: TransportServiceOptions::default(),
        }
    }

    /// Replace the security options.
    pub fn with_security(mut self, security: SecurityOptions) -> Self {
        self.security = security;
        self
    }

    /// Replace the Transport Service options.
    pub fn with_transport_service(mut self, transport_service: TransportServiceOptions) -> Self {
        self.transport_service = transport_service;
        self
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::new(1)
    }
}
