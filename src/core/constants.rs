//! Protocol constants for the Z-Wave command class core.
//!
//! These values are fixed by the Z-Wave application layer and MUST NOT be
//! changed, otherwise frames stop interoperating with real devices.

use std::time::Duration;

// =============================================================================
// COMMAND CLASS IDENTIFIERS
// =============================================================================

/// Basic command class.
pub const CC_BASIC: u16 = 0x20;

/// Transport Service command class (segmentation of large datagrams).
pub const CC_TRANSPORT_SERVICE: u16 = 0x55;

/// Security 2 command class.
pub const CC_SECURITY_2: u16 = 0x9F;

/// Security (S0) command class.
pub const CC_SECURITY: u16 = 0x98;

/// Supervision command class.
pub const CC_SUPERVISION: u16 = 0x6C;

/// First byte of a two-byte (extended) command class identifier.
pub const EXTENDED_CC_PREFIX_MIN: u8 = 0xF1;

/// Largest node id that fits into the one-byte fields of S0 frames.
pub const MAX_CLASSIC_NODE_ID: u16 = 0xFF;

// =============================================================================
// SECURITY (S0) COMMANDS
// =============================================================================

/// Security: Commands Supported Get.
pub const SECURITY_COMMANDS_SUPPORTED_GET: u8 = 0x02;

/// Security: Commands Supported Report.
pub const SECURITY_COMMANDS_SUPPORTED_REPORT: u8 = 0x03;

/// Security: Scheme Get.
pub const SECURITY_SCHEME_GET: u8 = 0x04;

/// Security: Scheme Report.
pub const SECURITY_SCHEME_REPORT: u8 = 0x05;

/// Security: Network Key Set.
pub const SECURITY_NETWORK_KEY_SET: u8 = 0x06;

/// Security: Network Key Verify.
pub const SECURITY_NETWORK_KEY_VERIFY: u8 = 0x07;

/// Security: Scheme Inherit.
pub const SECURITY_SCHEME_INHERIT: u8 = 0x08;

/// Security: Nonce Get.
pub const SECURITY_NONCE_GET: u8 = 0x40;

/// Security: Nonce Report.
pub const SECURITY_NONCE_REPORT: u8 = 0x80;

/// Security: Command Encapsulation.
pub const SECURITY_COMMAND_ENCAPSULATION: u8 = 0x81;

/// Security: Command Encapsulation with a piggybacked Nonce Get.
pub const SECURITY_COMMAND_ENCAPSULATION_NONCE_GET: u8 = 0xC1;

// =============================================================================
// SECURITY (S0) SIZES
// =============================================================================

/// Size of one S0 nonce (each half of the 16 byte IV).
pub const S0_HALF_NONCE_SIZE: usize = 8;

/// Size of the truncated CBC-MAC carried in S0 frames.
pub const S0_AUTH_CODE_SIZE: usize = 8;

/// AES block and key size.
pub const AES_BLOCK_SIZE: usize = 16;

/// Network key size (all security classes).
pub const NETWORK_KEY_SIZE: usize = 16;

/// Minimum Command Encapsulation payload:
/// sender nonce (8) + frame control (1) + nonce id (1) + auth code (8).
pub const S0_MIN_ENCAPSULATION_SIZE: usize = S0_HALF_NONCE_SIZE + 1 + 1 + S0_AUTH_CODE_SIZE;

/// Largest inner command that fits into a single S0 frame.
pub const S0_MAX_SINGLE_FRAME_PAYLOAD: usize = 28;

/// Frame control: more than one frame carries this command.
pub const S0_FLAG_SEQUENCED: u8 = 0b0001_0000;

/// Frame control: this is the second frame of a sequence.
pub const S0_FLAG_SECOND_FRAME: u8 = 0b0010_0000;

/// Frame control: 4 bit sequence counter.
pub const S0_SEQUENCE_COUNTER_MASK: u8 = 0b0000_1111;

/// Scheme 0 identifier carried in Scheme Get/Report/Inherit.
pub const S0_SCHEME_0: u8 = 0x00;

// =============================================================================
// TRANSPORT SERVICE COMMANDS (upper 5 bits of the command byte)
// =============================================================================

/// Transport Service: First Segment.
pub const TS_FIRST_SEGMENT: u8 = 0xC0;

/// Transport Service: Segment Complete.
pub const TS_SEGMENT_COMPLETE: u8 = 0xE8;

/// Transport Service: Segment Request.
pub const TS_SEGMENT_REQUEST: u8 = 0xC8;

/// Transport Service: Subsequent Segment.
pub const TS_SUBSEQUENT_SEGMENT: u8 = 0xE0;

/// Transport Service: Segment Wait.
pub const TS_SEGMENT_WAIT: u8 = 0xF0;

/// Mask selecting the command part of a Transport Service command byte.
pub const TS_COMMAND_MASK: u8 = 0b1111_1000;

/// Mask selecting the datagram size bits smuggled into the command byte.
pub const TS_SIZE_HIGH_MASK: u8 = 0b0000_0111;

// =============================================================================
// TRANSPORT SERVICE SIZES
// =============================================================================

/// Maximum number of datagram bytes per segment.
pub const MAX_SEGMENT_SIZE: usize = 39;

/// Largest datagram size representable in 11 bits.
pub const MAX_DATAGRAM_SIZE: usize = 0x07FF;

/// Size of the CRC16 trailer of every segment.
pub const TS_CHECKSUM_SIZE: usize = 2;

/// Highest Transport Service session id (4 bits, 0 is never handed out).
pub const TS_MAX_SESSION_ID: u8 = 0x0F;

/// Most frames buffered by one partial session before it is dropped.
///
/// A 2047 byte datagram needs 53 full segments.
pub const MAX_PARTIAL_SESSION_FRAMES: usize = 64;

/// More than this many queued segments switches to relaxed timing.
pub const RELAXED_TIMING_THRESHOLD: usize = 2;

// =============================================================================
// TIMING CONSTANTS - TRANSPORT SERVICE
// =============================================================================

/// Wait before requesting a missing segment (Transport Service V2).
pub const REQUEST_MISSING_SEGMENT_R2: Duration = Duration::from_millis(800);

/// Wait before requesting a missing segment (Transport Service V3).
pub const REQUEST_MISSING_SEGMENT_R3: Duration = Duration::from_millis(400);

/// Wait for Segment Complete after the last segment (V2).
pub const SEGMENT_COMPLETE_R2: Duration = Duration::from_millis(1000);

/// Wait for Segment Complete after the last segment (V3).
pub const SEGMENT_COMPLETE_R3: Duration = Duration::from_millis(500);

/// Inter-segment delay under relaxed timing (V2).
pub const RELAXED_TIMING_DELAY_R2: Duration = Duration::from_millis(35);

/// Inter-segment delay under relaxed timing (V3).
pub const RELAXED_TIMING_DELAY_R3: Duration = Duration::from_millis(15);

// =============================================================================
// TIMING CONSTANTS - SECURITY
// =============================================================================

/// Default lifetime of an S0 nonce.
pub const DEFAULT_NONCE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default time after which an incomplete partial session is abandoned.
pub const DEFAULT_PARTIAL_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
