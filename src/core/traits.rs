//! Core traits and identifiers shared by every layer.

use crate::cc::ParsingContext;

use super::error::Result;

/// Z-Wave node identifier (16 bit to cover Long Range nodes).
pub type NodeId = u16;

/// Structural identity of a multi-frame command class exchange.
///
/// Two frames belong to the same partial session when they come from the
/// same node, carry the same command class and have an equal
/// `PartialSessionId`. The command byte is deliberately not part of the key:
/// S0 `CommandEncapsulation` and `CommandEncapsulationNonceGet` may carry
/// either half of a sequence, and Transport Service first/subsequent
/// segments share a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartialSessionId {
    /// Sequenced S0 encapsulation.
    Security {
        /// 4 bit sequence counter from the frame control byte.
        sequence: u8,
    },
    /// Segmented Transport Service datagram.
    TransportService {
        /// 4 bit Transport Service session id.
        session_id: u8,
    },
}

/// Command classes that can be split over several frames.
///
/// Frames that return `None` from [`PartialCc::partial_session_id`] bypass
/// session tracking entirely.
pub trait PartialCc: Sized {
    /// Command class id used to scope the session.
    fn cc_id(&self) -> u16;

    /// Key grouping the frames of one exchange, if this frame is partial.
    fn partial_session_id(&self) -> Option<PartialSessionId>;

    /// Whether this frame discards the frames already buffered under its key
    /// and opens a fresh session.
    ///
    /// `session` holds the frames buffered so far, not including `self`.
    fn starts_session(&self, session: &[Self]) -> bool {
        let _ = session;
        false
    }

    /// Whether this frame repeats `buffered` and should take its place
    /// instead of being appended.
    fn supersedes(&self, buffered: &Self) -> bool {
        let _ = buffered;
        false
    }

    /// Whether more frames are needed after seeing `session`.
    ///
    /// `session` holds every frame received so far, in arrival order,
    /// including `self` as the last element.
    fn expect_more_messages(&self, session: &[Self]) -> bool;

    /// Merge the earlier frames of a session into `self`.
    ///
    /// Called exactly once, on the frame that completed the session.
    fn merge_partials(&mut self, partials: Vec<Self>, ctx: &mut ParsingContext<'_>) -> Result<()>;
}

/// Serialization of a command into its payload bytes.
///
/// Implementations return a fresh buffer on every call and never mutate
/// the command.
pub trait CcPayload {
    /// Command class id.
    fn cc_id(&self) -> u16;

    /// Command byte as it appears on the wire.
    fn cc_command(&self) -> u8;

    /// Payload bytes following the command byte.
    fn payload(&self) -> Vec<u8>;
}
