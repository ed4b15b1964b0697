//! Error types for the Z-Wave protocol core.
//!
//! Every error maps onto a stable numeric [`ErrorCode`]. The rest of the
//! driver switches on those codes, so their values and their meaning are
//! part of the public contract.

use thiserror::Error;

use super::traits::NodeId;

/// Stable numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// The frame is shorter than its format requires.
    PacketFormatTruncated = 0,
    /// The frame is structurally malformed.
    PacketFormatInvalid = 1,
    /// A checksum did not match.
    PacketFormatChecksum = 2,
    /// The frame is well-formed but semantically inconsistent.
    PacketFormatInvalidPayload = 3,
    /// Authentication or decryption of an encapsulated frame failed.
    PacketFormatDecryptionFailed = 4,
    /// Security keys required for the operation are not configured.
    DriverNoSecurity = 109,
    /// The entropy source failed; fatal for the driver.
    EntropyUnavailable = 110,
    /// A command class was used in an invalid way.
    CcInvalid = 300,
    /// The command class is not supported.
    CcNotSupported = 302,
    /// The command is not implemented.
    CcNotImplemented = 303,
    /// An argument was invalid (e.g. key length).
    ArgumentInvalid = 322,
    /// No nonce is available to encrypt a command for the peer.
    SecurityCcNoNonce = 360,
    /// No SPAN is established with the peer.
    Security2CcNoSpan = 361,
    /// No MPAN is established for the multicast group.
    Security2CcNoMpan = 362,
    /// A Transport Service session was aborted.
    TransportServiceAborted = 380,
}

impl ErrorCode {
    /// Get the numeric value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if this is a packet-format error (fatal to the current frame only).
    pub fn is_packet_format(self) -> bool {
        (self as u16) < 100
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZW{:04}", self.as_u16())
    }
}

/// Errors raised while validating a frame's wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Frame is too short.
    #[error("packet truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Malformed structure.
    #[error("invalid packet: {0}")]
    Invalid(String),

    /// Checksum mismatch.
    #[error("checksum mismatch: expected 0x{expected:04x}, computed 0x{actual:04x}")]
    Checksum {
        /// Checksum carried in the frame.
        expected: u16,
        /// Checksum computed over the received bytes.
        actual: u16,
    },

    /// Well-formed but semantically inconsistent payload.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl PacketError {
    /// Get the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PacketError::Truncated { .. } => ErrorCode::PacketFormatTruncated,
            PacketError::Invalid(_) => ErrorCode::PacketFormatInvalid,
            PacketError::Checksum { .. } => ErrorCode::PacketFormatChecksum,
            PacketError::InvalidPayload(_) => ErrorCode::PacketFormatInvalidPayload,
        }
    }
}

/// Check that a payload has at least `expected` bytes.
pub fn validate_len(payload: &[u8], expected: usize) -> Result<(), PacketError> {
    if payload.len() < expected {
        return Err(PacketError::Truncated {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Errors in the crypto primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key has the wrong length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// IV has the wrong length.
    #[error("invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIvLength {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// The operating system entropy source failed.
    #[error("entropy source unavailable")]
    EntropyUnavailable,
}

impl CryptoError {
    /// Get the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CryptoError::EntropyUnavailable => ErrorCode::EntropyUnavailable,
            _ => ErrorCode::ArgumentInvalid,
        }
    }
}

/// Errors in the security layer (S0 and S2).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// No nonce from the peer is available for encrypting.
    #[error("no nonce available for node {node_id}")]
    NoNonce {
        /// Peer we wanted to send to.
        node_id: NodeId,
    },

    /// The nonce referenced by a received frame is unknown or expired.
    #[error("nonce 0x{nonce_id:02x} expired, cannot decode security encapsulated command")]
    NonceExpired {
        /// Nonce id from the frame.
        nonce_id: u8,
    },

    /// Authentication code mismatch.
    #[error("invalid auth code, won't accept security encapsulated command")]
    InvalidAuthCode,

    /// No SPAN established with the peer.
    #[error("no SPAN established with node {node_id}")]
    NoSpan {
        /// Peer node.
        node_id: NodeId,
    },

    /// No MPAN for the multicast group.
    #[error("no MPAN for multicast group {group_id}")]
    NoMpan {
        /// Multicast group.
        group_id: u8,
    },

    /// Keys for the requested security class are missing.
    #[error("security keys not initialized: {0}")]
    NotInitialized(String),

    /// A node id does not fit into the one-byte S0 fields.
    #[error("node id {0} cannot be used with S0")]
    InvalidNodeId(NodeId),

    /// Packet format error.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// Crypto primitive error.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl SecurityError {
    /// Get the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SecurityError::NoNonce { .. } => ErrorCode::SecurityCcNoNonce,
            SecurityError::NonceExpired { .. } => ErrorCode::PacketFormatInvalidPayload,
            SecurityError::InvalidAuthCode => ErrorCode::PacketFormatDecryptionFailed,
            SecurityError::NoSpan { .. } => ErrorCode::Security2CcNoSpan,
            SecurityError::NoMpan { .. } => ErrorCode::Security2CcNoMpan,
            SecurityError::NotInitialized(_) => ErrorCode::DriverNoSecurity,
            SecurityError::InvalidNodeId(_) => ErrorCode::ArgumentInvalid,
            SecurityError::Packet(e) => e.code(),
            SecurityError::Crypto(e) => e.code(),
        }
    }
}

/// Errors in Transport Service segmentation and reassembly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportServiceError {
    /// The session was aborted by the peer or the caller.
    #[error("transport service session {session_id} aborted")]
    Aborted {
        /// The aborted session.
        session_id: u8,
    },

    /// The datagram does not fit into the 11 bit size field.
    #[error("datagram of {size} bytes exceeds the maximum of {max}")]
    DatagramTooLarge {
        /// Datagram size.
        size: usize,
        /// Largest representable size.
        max: usize,
    },

    /// Session id outside 1..=15.
    #[error("invalid transport service session id {0}")]
    InvalidSessionId(u8),

    /// Packet format error.
    #[error(transparent)]
    Packet(#[from] PacketError),
}

impl TransportServiceError {
    /// Get the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportServiceError::Aborted { .. } => ErrorCode::TransportServiceAborted,
            TransportServiceError::DatagramTooLarge { .. }
            | TransportServiceError::InvalidSessionId(_) => ErrorCode::ArgumentInvalid,
            TransportServiceError::Packet(e) => e.code(),
        }
    }
}

/// Errors at the command class level.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CcError {
    /// Invalid use of a command class.
    #[error("invalid command class usage: {0}")]
    Invalid(String),

    /// The command class is not supported.
    #[error("command class 0x{0:02x} is not supported")]
    NotSupported(u16),

    /// The command is not implemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl CcError {
    /// Get the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CcError::Invalid(_) => ErrorCode::CcInvalid,
            CcError::NotSupported(_) => ErrorCode::CcNotSupported,
            CcError::NotImplemented(_) => ErrorCode::CcNotImplemented,
        }
    }
}

/// Top-level errors of the protocol core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Packet format error.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Security error.
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// Command class error.
    #[error("command class error: {0}")]
    Cc(#[from] CcError),

    /// Transport Service error.
    #[error("transport service error: {0}")]
    TransportService(#[from] TransportServiceError),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    Argument(String),
}

impl Error {
    /// Get the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Packet(e) => e.code(),
            Error::Crypto(e) => e.code(),
            Error::Security(e) => e.code(),
            Error::Cc(e) => e.code(),
            Error::TransportService(e) => e.code(),
            Error::Argument(_) => ErrorCode::ArgumentInvalid,
        }
    }

    /// Check if the frame that caused this error should simply be dropped.
    ///
    /// Malformed, unauthenticated and stale frames are dropped without any
    /// response so that nothing about the failure leaks to the sender.
    pub fn is_silent_drop(&self) -> bool {
        self.code().is_packet_format()
    }

    /// Check if the operation can succeed after fetching a fresh nonce/SPAN.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::SecurityCcNoNonce
                | ErrorCode::Security2CcNoSpan
                | ErrorCode::Security2CcNoMpan
                | ErrorCode::PacketFormatInvalidPayload
        )
    }

    /// Check if this error is classified alongside timeouts for retry purposes.
    pub fn is_transmission_failure(&self) -> bool {
        matches!(self.code(), ErrorCode::PacketFormatDecryptionFailed)
    }

    /// Check if the whole security/transport stack must be reset.
    ///
    /// Only a failing entropy source qualifies. Payload-level errors such as
    /// `PacketFormatInvalidPayload` never reset lower-level state.
    pub fn resets_stack(&self) -> bool {
        matches!(self.code(), ErrorCode::EntropyUnavailable)
    }

    /// Check if this error is a programmer or configuration error.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::CcInvalid
                | ErrorCode::CcNotSupported
                | ErrorCode::CcNotImplemented
                | ErrorCode::ArgumentInvalid
                | ErrorCode::DriverNoSecurity
        )
    }
}

/// Result type for protocol core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
