//! Partial command class sessions.
//!
//! Multi-frame exchanges (sequenced S0 encapsulation, segmented Transport
//! Service datagrams) are buffered here until the command class says the
//! exchange is complete. The frame that completes a session merges the
//! earlier frames into itself and is returned as the one logical command.
//!
//! The manager has no timer of its own. Stalled sessions are released by
//! the caller through [`PartialSessionManager::abandon`] or
//! [`PartialSessionManager::abandon_stale`]. A repeated frame replaces its
//! buffered copy without counting as activity, and a session holding more
//! than the frame limit is dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::cc::ParsingContext;
use crate::core::{
    MAX_PARTIAL_SESSION_FRAMES, NodeId, PacketError, PartialCc, PartialSessionId, Result,
};

/// Identity of a partial session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartialSessionKey {
    /// Node the frames come from.
    pub node_id: NodeId,
    /// Command class of the frames.
    pub cc_id: u16,
    /// Command class specific session id.
    pub id: PartialSessionId,
}

#[derive(Debug)]
struct PartialSession<T> {
    frames: Vec<T>,
    started_at: Instant,
    last_activity: Instant,
}

impl<T> PartialSession<T> {
    fn new(now: Instant) -> Self {
        Self {
            frames: Vec::new(),
            started_at: now,
            last_activity: now,
        }
    }
}

/// Buffers the frames of open partial sessions.
#[derive(Debug)]
pub struct PartialSessionManager<T> {
    sessions: HashMap<PartialSessionKey, PartialSession<T>>,
    max_frames: usize,
}

impl<T> Default for PartialSessionManager<T> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            max_frames: MAX_PARTIAL_SESSION_FRAMES,
        }
    }
}

impl<T: PartialCc> PartialSessionManager<T> {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many frames one session may buffer.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames.max(1);
        self
    }

    /// Frame limit per session.
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Frames buffered for a session, in arrival order.
    pub fn frames(&self, key: &PartialSessionKey) -> Option<&[T]> {
        self.sessions.get(key).map(|s| s.frames.as_slice())
    }

    /// Time the session was opened.
    pub fn started_at(&self, key: &PartialSessionKey) -> Option<Instant> {
        self.sessions.get(key).map(|s| s.started_at)
    }

    /// Keys of all open sessions.
    pub fn keys(&self) -> impl Iterator<Item = &PartialSessionKey> {
        self.sessions.keys()
    }

    /// Add a frame from `node_id`.
    ///
    /// Returns the frame itself if it is not partial, `None` while its
    /// session still expects more frames, and the merged command once the
    /// session completes.
    pub fn add(
        &mut self,
        node_id: NodeId,
        frame: T,
        ctx: &mut ParsingContext<'_>,
    ) -> Result<Option<T>> {
        self.add_at(node_id, frame, ctx, Instant::now())
    }

    /// Add a frame received at `now`.
    pub fn add_at(
        &mut self,
        node_id: NodeId,
        frame: T,
        ctx: &mut ParsingContext<'_>,
        now: Instant,
    ) -> Result<Option<T>> {
        let Some(id) = frame.partial_session_id() else {
            return Ok(Some(frame));
        };
        let key = PartialSessionKey {
            node_id,
            cc_id: frame.cc_id(),
            id,
        };

        let restart = self
            .sessions
            .get(&key)
            .is_some_and(|s| frame.starts_session(&s.frames));
        if restart {
            self.sessions.remove(&key);
            debug!(node_id, ?id, "restarting partial session");
        }

        let session = self.sessions.entry(key).or_insert_with(|| {
            debug!(node_id, ?id, "opened partial session");
            PartialSession::new(now)
        });
        match session.frames.iter().position(|f| frame.supersedes(f)) {
            Some(index) => {
                // Keep arrival order: the newest copy becomes the last frame.
                session.frames.remove(index);
                session.frames.push(frame);
                trace!(node_id, ?id, "replaced repeated frame");
            }
            None if session.frames.len() >= self.max_frames => {
                self.sessions.remove(&key);
                warn!(node_id, ?id, max = self.max_frames, "dropping oversized partial session");
                return Err(PacketError::InvalidPayload(format!(
                    "partial session exceeded {} frames",
                    self.max_frames
                ))
                .into());
            }
            None => {
                session.frames.push(frame);
                session.last_activity = now;
            }
        }

        let more = session
            .frames
            .last()
            .is_some_and(|last| last.expect_more_messages(&session.frames));
        if more {
            trace!(node_id, ?id, frames = session.frames.len(), "waiting for more frames");
            return Ok(None);
        }

        // Removed before merging so a failed merge cannot leave a
        // half-consumed session behind.
        let Some(session) = self.sessions.remove(&key) else {
            return Ok(None);
        };
        let mut frames = session.frames;
        let Some(mut last) = frames.pop() else {
            return Ok(None);
        };
        debug!(node_id, ?id, frames = frames.len() + 1, "completed partial session");
        last.merge_partials(frames, ctx)?;
        Ok(Some(last))
    }

    /// Drop a session and its buffered frames.
    pub fn abandon(&mut self, key: &PartialSessionKey) -> bool {
        let removed = self.sessions.remove(key).is_some();
        if removed {
            debug!(node_id = key.node_id, id = ?key.id, "abandoned partial session");
        }
        removed
    }

    /// Drop every session of a node.
    pub fn abandon_node(&mut self, node_id: NodeId) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|k, _| k.node_id != node_id);
        before - self.sessions.len()
    }

    /// Drop sessions without activity for at least `max_age`, returning how many.
    pub fn abandon_stale(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| now.saturating_duration_since(s.last_activity) < max_age);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!(dropped, "abandoned stale partial sessions");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cc::{BasicCc, CcRegistry, CommandClass, RawCc};
    use crate::core::{CC_TRANSPORT_SERVICE, ErrorCode};
    use crate::security::{Encapsulation, FrameControl, SecurityCc};
    use crate::transport_service::{Segment, TransportServiceCc};

    const NODE: NodeId = 9;

    fn first(session_id: u8, size: u16, data: Vec<u8>) -> CommandClass {
        CommandClass::TransportService(TransportServiceCc::FirstSegment(Segment::new(
            session_id, size, 0, data,
        )))
    }

    fn subsequent(session_id: u8, size: u16, offset: u16, data: Vec<u8>) -> CommandClass {
        CommandClass::TransportService(TransportServiceCc::SubsequentSegment(Segment::new(
            session_id, size, offset, data,
        )))
    }

    fn ts_key(session_id: u8) -> PartialSessionKey {
        PartialSessionKey {
            node_id: NODE,
            cc_id: CC_TRANSPORT_SERVICE,
            id: PartialSessionId::TransportService { session_id },
        }
    }

    fn s0_frame(second: bool, sequence_counter: u8, payload: Vec<u8>) -> CommandClass {
        CommandClass::Security(SecurityCc::CommandEncapsulation(Encapsulation {
            kind: Default::default(),
            frame_control: FrameControl {
                sequenced: true,
                second_frame: second,
                sequence_counter,
            },
            payload,
            encapsulated: None,
        }))
    }

    #[test]
    fn test_non_partial_frames_pass_through() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();
        let cc = CommandClass::Basic(BasicCc::Get);
        assert_eq!(mgr.add(NODE, cc.clone(), &mut ctx).unwrap(), Some(cc));
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_transport_service_session_completes() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();

        assert_eq!(mgr.add(NODE, first(3, 45, vec![0xAA; 39]), &mut ctx).unwrap(), None);
        assert_eq!(mgr.frames(&ts_key(3)).map(<[_]>::len), Some(1));

        let done = mgr
            .add(NODE, subsequent(3, 45, 39, vec![0xBB; 6]), &mut ctx)
            .unwrap()
            .unwrap();
        assert!(mgr.is_empty());

        let Some(CommandClass::Raw(RawCc { payload, .. })) = done.encapsulated() else {
            panic!("expected the reassembled datagram");
        };
        assert_eq!(payload.len(), 43);
        assert_eq!(&payload[37..], &[0xBB; 6]);
    }

    #[test]
    fn test_sessions_are_independent() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();

        assert_eq!(mgr.add(NODE, first(1, 45, vec![0x01; 39]), &mut ctx).unwrap(), None);
        assert_eq!(mgr.add(NODE, first(2, 45, vec![0x02; 39]), &mut ctx).unwrap(), None);
        assert_eq!(mgr.add(NODE + 1, first(1, 45, vec![0x03; 39]), &mut ctx).unwrap(), None);
        assert_eq!(mgr.len(), 3);

        let done = mgr
            .add(NODE, subsequent(2, 45, 39, vec![0x02; 6]), &mut ctx)
            .unwrap();
        assert!(done.is_some());
        assert_eq!(mgr.len(), 2);
        assert_eq!(mgr.abandon_node(NODE + 1), 1);
    }

    #[test]
    fn test_new_first_segment_restarts_session() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();

        mgr.add(NODE, first(4, 45, vec![0xEE; 39]), &mut ctx).unwrap();
        mgr.add(NODE, first(4, 45, vec![0xAA; 39]), &mut ctx).unwrap();
        assert_eq!(mgr.frames(&ts_key(4)).map(<[_]>::len), Some(1));

        let done = mgr
            .add(NODE, subsequent(4, 45, 39, vec![0xBB; 6]), &mut ctx)
            .unwrap()
            .unwrap();
        let Some(CommandClass::Raw(raw)) = done.encapsulated() else {
            panic!("expected the reassembled datagram");
        };
        assert_eq!(raw.cc_id, 0xAA);
    }

    #[test]
    fn test_failed_merge_releases_session() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();

        // Single segment datagram holding a truncated Basic Set.
        mgr.add(NODE, first(5, 2, vec![0x20, 0x01]), &mut ctx)
            .unwrap_err();
        assert!(mgr.is_empty());

        assert_eq!(mgr.add(NODE, first(5, 45, vec![0xAA; 39]), &mut ctx).unwrap(), None);
        assert!(mgr
            .add(NODE, subsequent(5, 45, 39, vec![0xBB; 6]), &mut ctx)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_s0_sequence_merges() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();

        assert_eq!(mgr.add(NODE, s0_frame(false, 2, vec![0x20, 0x01]), &mut ctx).unwrap(), None);
        let done = mgr
            .add(NODE, s0_frame(true, 2, vec![0x63]), &mut ctx)
            .unwrap()
            .unwrap();
        assert_eq!(
            done.encapsulated(),
            Some(&CommandClass::Basic(BasicCc::Set { target_value: 0x63 }))
        );
    }

    #[test]
    fn test_s0_second_frame_alone_is_rejected() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();

        let err = mgr
            .add(NODE, s0_frame(true, 7, vec![0x63]), &mut ctx)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PacketFormatInvalidPayload);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_abandon_stale() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();
        let start = Instant::now();

        mgr.add_at(NODE, first(1, 45, vec![0; 39]), &mut ctx, start).unwrap();
        mgr.add_at(
            NODE,
            first(2, 45, vec![0; 39]),
            &mut ctx,
            start + Duration::from_secs(8),
        )
        .unwrap();

        assert_eq!(mgr.abandon_stale(start + Duration::from_secs(10), Duration::from_secs(10)), 1);
        assert!(mgr.frames(&ts_key(1)).is_none());
        assert!(mgr.frames(&ts_key(2)).is_some());
        assert!(mgr.abandon(&ts_key(2)));
        assert!(!mgr.abandon(&ts_key(2)));
    }

    #[test]
    fn test_repeated_segment_replaces_buffered_copy() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new();
        let start = Instant::now();

        for i in 0..500u64 {
            let at = start + Duration::from_millis(i);
            let frame = subsequent(3, 200, 39, vec![0xCC; 39]);
            assert_eq!(mgr.add_at(NODE, frame, &mut ctx, at).unwrap(), None);
        }
        assert_eq!(mgr.frames(&ts_key(3)).map(<[_]>::len), Some(1));

        // Repeats do not keep the session alive.
        assert_eq!(mgr.abandon_stale(start + Duration::from_secs(1), Duration::from_millis(900)), 1);
    }

    #[test]
    fn test_session_over_frame_limit_is_dropped() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(NODE, 1, &registry);
        let mut mgr = PartialSessionManager::new().with_max_frames(4);

        for offset in 1..=4 {
            let frame = subsequent(6, 2047, offset, vec![0x00]);
            assert_eq!(mgr.add(NODE, frame, &mut ctx).unwrap(), None);
        }
        let err = mgr
            .add(NODE, subsequent(6, 2047, 5, vec![0x00]), &mut ctx)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PacketFormatInvalidPayload);
        assert!(mgr.frames(&ts_key(6)).is_none());
        assert_eq!(mgr.max_frames(), 4);
    }
}
