//! Splitting datagrams into segments and tracking what is missing.

use crate::core::{MAX_DATAGRAM_SIZE, MAX_SEGMENT_SIZE, TS_MAX_SESSION_ID, TransportServiceError};

use super::segment::{Segment, TransportServiceCc, coverage};

/// Hands out Transport Service session ids, cycling through `1..=15`.
#[derive(Debug, Clone, Default)]
pub struct SessionIdAllocator {
    last: u8,
}

impl SessionIdAllocator {
    /// Create an allocator whose first id is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next session id.
    pub fn next_id(&mut self) -> u8 {
        self.last = if self.last >= TS_MAX_SESSION_ID {
            1
        } else {
            self.last + 1
        };
        self.last
    }
}

/// Split a serialized command into Transport Service segments.
///
/// `max_segment_size` is clamped to `1..=39`. Even a datagram that fits into
/// one segment is framed as a single First Segment.
pub fn segment_datagram(
    datagram: &[u8],
    session_id: u8,
    max_segment_size: usize,
) -> Result<Vec<TransportServiceCc>, TransportServiceError> {
    if session_id == 0 || session_id > TS_MAX_SESSION_ID {
        return Err(TransportServiceError::InvalidSessionId(session_id));
    }
    if datagram.is_empty() || datagram.len() > MAX_DATAGRAM_SIZE {
        return Err(TransportServiceError::DatagramTooLarge {
            size: datagram.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }

    let chunk_size = max_segment_size.clamp(1, MAX_SEGMENT_SIZE);
    let datagram_size = datagram.len() as u16;
    let segments = datagram
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| {
            let offset = (i * chunk_size) as u16;
            let segment = Segment::new(session_id, datagram_size, offset, chunk.to_vec());
            if i == 0 {
                TransportServiceCc::FirstSegment(segment)
            } else {
                TransportServiceCc::SubsequentSegment(segment)
            }
        })
        .collect();
    Ok(segments)
}

/// Offset of the first datagram byte not covered by `segments`.
///
/// `None` if the datagram is complete.
pub fn first_missing_offset(datagram_size: u16, segments: &[&Segment]) -> Option<u16> {
    coverage(datagram_size, segments)
        .iter()
        .position(|covered| !covered)
        .map(|pos| pos as u16)
}

/// Build the Segment Request asking for the first missing part of a datagram.
pub fn segment_request(
    session_id: u8,
    datagram_size: u16,
    segments: &[&Segment],
) -> Option<TransportServiceCc> {
    first_missing_offset(datagram_size, segments).map(|datagram_offset| {
        TransportServiceCc::SegmentRequest {
            session_id,
            datagram_offset,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use crate::cc::{CcRegistry, CommandClass, ParsingContext};
    use crate::core::PartialCc;

    fn segments_of(ccs: &[TransportServiceCc]) -> Vec<&Segment> {
        ccs.iter().filter_map(TransportServiceCc::segment).collect()
    }

    #[test]
    fn test_session_ids_wrap() {
        let mut ids = SessionIdAllocator::new();
        let drawn: Vec<u8> = (0..16).map(|_| ids.next_id()).collect();
        assert_eq!(drawn[0], 1);
        assert_eq!(drawn[14], 15);
        assert_eq!(drawn[15], 1);
    }

    #[test]
    fn test_segment_sizes() {
        let datagram = vec![0x42; 100];
        let segments = segment_datagram(&datagram, 2, 39).unwrap();
        assert_eq!(segments.len(), 3);
        assert!(matches!(segments[0], TransportServiceCc::FirstSegment(_)));
        let lens: Vec<usize> = segments_of(&segments)
            .iter()
            .map(|s| s.partial_datagram.len())
            .collect();
        assert_eq!(lens, vec![39, 39, 22]);
        let offsets: Vec<u16> = segments_of(&segments)
            .iter()
            .map(|s| s.datagram_offset)
            .collect();
        assert_eq!(offsets, vec![0, 39, 78]);
    }

    #[test]
    fn test_segment_argument_checks() {
        assert_eq!(
            segment_datagram(&[1, 2, 3], 0, 39).unwrap_err(),
            TransportServiceError::InvalidSessionId(0)
        );
        assert_eq!(
            segment_datagram(&[1, 2, 3], 16, 39).unwrap_err(),
            TransportServiceError::InvalidSessionId(16)
        );
        assert!(matches!(
            segment_datagram(&vec![0; MAX_DATAGRAM_SIZE + 1], 1, 39),
            Err(TransportServiceError::DatagramTooLarge { .. })
        ));
    }

    #[test]
    fn test_first_missing_offset() {
        let segments = segment_datagram(&[0u8; 90], 1, 39).unwrap();
        let all = segments_of(&segments);
        assert_eq!(first_missing_offset(90, &all), None);
        assert_eq!(first_missing_offset(90, &[all[0], all[2]]), Some(39));

        let request = segment_request(1, 90, &[all[0], all[2]]).unwrap();
        assert_eq!(
            request,
            TransportServiceCc::SegmentRequest {
                session_id: 1,
                datagram_offset: 39,
            }
        );
        assert_eq!(segment_request(1, 90, &all), None);
    }

    proptest! {
        #[test]
        fn prop_any_arrival_order_reassembles(
            datagram in proptest::collection::vec(any::<u8>(), 40..=2000),
            seed in any::<u64>(),
        ) {
            let segments = segment_datagram(&datagram, 5, MAX_SEGMENT_SIZE).unwrap();

            // Deterministic shuffle driven by the generated seed.
            let mut order: Vec<usize> = (0..segments.len()).collect();
            let mut state = seed | 1;
            for i in (1..order.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                order.swap(i, (state % (i as u64 + 1)) as usize);
            }

            let mut session: Vec<CommandClass> = Vec::new();
            for (n, &i) in order.iter().enumerate() {
                session.push(CommandClass::TransportService(segments[i].clone()));
                let last = &session[session.len() - 1];
                let more = last.expect_more_messages(&session);
                prop_assert_eq!(more, n + 1 < order.len());
            }

            let registry = CcRegistry::empty();
            let mut ctx = ParsingContext::new(2, 1, &registry);
            let mut last = session.pop().unwrap();
            last.merge_partials(session, &mut ctx).unwrap();

            let Some(CommandClass::Raw(raw)) = last.encapsulated() else {
                panic!("expected a raw inner command");
            };
            let mut reassembled = vec![raw.cc_id as u8, raw.command];
            if raw.cc_id > 0xFF {
                reassembled = raw.cc_id.to_be_bytes().to_vec();
                reassembled.push(raw.command);
            }
            reassembled.extend_from_slice(&raw.payload);
            prop_assert_eq!(reassembled, datagram);
        }
    }
}
