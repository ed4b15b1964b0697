//! Sending side of a Transport Service session.
//!
//! [`SegmentSender`] is a plain state machine: the caller feeds it the
//! receiver's Segment Request, Segment Wait and Segment Complete commands
//! and it tells the caller what to do next. With the `async` feature,
//! [`SegmentSender::send_all`] pushes the queued segments into a
//! [`SegmentSink`], pacing them once relaxed timing applies.

use std::time::Duration;

use tracing::{debug, trace};

use crate::config::{TransportServiceOptions, TransportServiceTiming};
use crate::core::{PacketError, TransportServiceError};

use super::segment::TransportServiceCc;
use super::segmenter::segment_datagram;

/// Where a sending session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Segments are still queued.
    Sending,
    /// All segments went out, waiting for Segment Complete.
    AwaitingComplete,
    /// The receiver asked us to back off.
    Waiting,
    /// The receiver confirmed the datagram.
    Complete,
    /// The session was given up.
    Aborted,
}

/// What the caller has to do after a response from the receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum SenderAction {
    /// Retransmit this segment.
    Resend(TransportServiceCc),
    /// Back off; call [`SegmentSender::restart`] to send the datagram again.
    Wait {
        /// Segments still pending on the receiver.
        pending_segments: u8,
    },
    /// The datagram was delivered.
    Complete,
    /// The response does not concern this session.
    Ignored,
}

/// Sending state of one segmented datagram.
#[derive(Debug, Clone)]
pub struct SegmentSender {
    session_id: u8,
    segments: Vec<TransportServiceCc>,
    next: usize,
    timing: TransportServiceTiming,
    relaxed_threshold: usize,
    state: SenderState,
}

impl SegmentSender {
    /// Segment `datagram` for sending under `session_id`.
    pub fn new(
        datagram: &[u8],
        session_id: u8,
        options: &TransportServiceOptions,
    ) -> Result<Self, TransportServiceError> {
        let segments = segment_datagram(datagram, session_id, options.max_segment_size)?;
        debug!(
            session_id,
            size = datagram.len(),
            segments = segments.len(),
            "opened transport service send session"
        );
        Ok(Self {
            session_id,
            segments,
            next: 0,
            timing: options.timing(),
            relaxed_threshold: options.relaxed_timing_threshold,
            state: SenderState::Sending,
        })
    }

    /// Session id.
    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    /// All segments of the datagram.
    pub fn segments(&self) -> &[TransportServiceCc] {
        &self.segments
    }

    /// Current state.
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Check if the receiver confirmed the datagram.
    pub fn is_complete(&self) -> bool {
        self.state == SenderState::Complete
    }

    /// Whether segments are paced to avoid overrunning the receiver.
    pub fn uses_relaxed_timing(&self) -> bool {
        self.segments.len() > self.relaxed_threshold
    }

    /// Delay between two segments, if any.
    pub fn inter_segment_delay(&self) -> Option<Duration> {
        self.uses_relaxed_timing()
            .then_some(self.timing.relaxed_timing_delay)
    }

    /// How long to wait for Segment Complete after the last segment.
    pub fn segment_complete_timeout(&self) -> Duration {
        self.timing.segment_complete
    }

    /// Take the next queued segment.
    pub fn next_segment(&mut self) -> Option<TransportServiceCc> {
        if self.state != SenderState::Sending {
            return None;
        }
        let segment = self.segments.get(self.next).cloned();
        match segment {
            Some(_) => {
                self.next += 1;
                if self.next == self.segments.len() {
                    self.state = SenderState::AwaitingComplete;
                }
            }
            None => self.state = SenderState::AwaitingComplete,
        }
        segment
    }

    /// Queue the whole datagram again, e.g. after a Segment Wait.
    pub fn restart(&mut self) {
        if matches!(self.state, SenderState::Complete | SenderState::Aborted) {
            return;
        }
        self.next = 0;
        self.state = SenderState::Sending;
    }

    /// Give up on the session.
    pub fn abort(&mut self) -> TransportServiceError {
        self.state = SenderState::Aborted;
        debug!(session_id = self.session_id, "aborted transport service send session");
        TransportServiceError::Aborted {
            session_id: self.session_id,
        }
    }

    /// React to a command from the receiver.
    pub fn handle_response(
        &mut self,
        response: &TransportServiceCc,
    ) -> Result<SenderAction, TransportServiceError> {
        if matches!(self.state, SenderState::Complete | SenderState::Aborted) {
            return Ok(SenderAction::Ignored);
        }

        match *response {
            TransportServiceCc::SegmentRequest {
                session_id,
                datagram_offset,
            } if session_id == self.session_id => {
                let offset = datagram_offset as usize;
                let segment = self
                    .segments
                    .iter()
                    .find(|cc| {
                        cc.segment()
                            .is_some_and(|s| s.datagram_offset as usize <= offset && offset < s.end())
                    })
                    .cloned()
                    .ok_or_else(|| {
                        PacketError::InvalidPayload(format!(
                            "segment request for offset {offset} outside the datagram"
                        ))
                    })?;
                trace!(session_id, datagram_offset, "resending segment");
                Ok(SenderAction::Resend(segment))
            }
            TransportServiceCc::SegmentComplete { session_id } if session_id == self.session_id => {
                self.state = SenderState::Complete;
                debug!(session_id, "transport service datagram delivered");
                Ok(SenderAction::Complete)
            }
            TransportServiceCc::SegmentWait { pending_segments } => {
                self.state = SenderState::Waiting;
                debug!(
                    session_id = self.session_id,
                    pending_segments, "receiver asked to wait"
                );
                Ok(SenderAction::Wait { pending_segments })
            }
            _ => Ok(SenderAction::Ignored),
        }
    }
}

#[cfg(feature = "async")]
mod pacing {
    use std::future::Future;

    use crate::core::Result;

    use super::{SegmentSender, TransportServiceCc};

    /// Destination of outgoing segments, typically the serial link.
    pub trait SegmentSink {
        /// Send one segment.
        fn send_segment(
            &mut self,
            segment: &TransportServiceCc,
        ) -> impl Future<Output = Result<()>> + Send;
    }

    impl SegmentSender {
        /// Send every queued segment, returning how many were sent.
        ///
        /// Under relaxed timing the configured delay is awaited between
        /// two segments.
        pub async fn send_all<S: SegmentSink>(&mut self, sink: &mut S) -> Result<usize> {
            let delay = self.inter_segment_delay();
            let mut sent = 0;
            while let Some(segment) = self.next_segment() {
                if sent > 0 {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                sink.send_segment(&segment).await?;
                sent += 1;
            }
            Ok(sent)
        }
    }
}

#[cfg(feature = "async")]
pub use pacing::SegmentSink;
