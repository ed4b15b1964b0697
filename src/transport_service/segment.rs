//! Transport Service commands and their wire format.
//!
//! ```text
//! First Segment     (cmd = 0xC0 | size[10:8])
//! +-----------+----------------------+--------------+-------+--------+
//! | size[7:0] | sid:4 ext:1 rsvd:3   | [len, ext..] | data  | crc16  |
//! +-----------+----------------------+--------------+-------+--------+
//!
//! Subsequent Segment (cmd = 0xE0 | size[10:8])
//! +-----------+----------------------+-------------+--------------+------+-------+
//! | size[7:0] | sid:4 ext:1 off[10:8]| off[7:0]    | [len, ext..] | data | crc16 |
//! +-----------+----------------------+-------------+--------------+------+-------+
//! ```
//!
//! The CRC16 (init `0x1D0F`, big-endian) covers the command class id, the
//! command byte and every payload byte before the checksum.

use tracing::trace;

use crate::cc::{CommandClass, ParsingContext};
use crate::codec::{CcHeader, Crc16};
use crate::core::{
    CC_TRANSPORT_SERVICE, CcError, CcPayload, MAX_SEGMENT_SIZE, PacketError, Result,
    TS_CHECKSUM_SIZE, TS_COMMAND_MASK, TS_FIRST_SEGMENT, TS_SEGMENT_COMPLETE, TS_SEGMENT_REQUEST,
    TS_SEGMENT_WAIT, TS_SIZE_HIGH_MASK, TS_SUBSEQUENT_SEGMENT, validate_len,
};

const SESSION_ID_SHIFT: u8 = 4;
const HEADER_EXTENSION_FLAG: u8 = 0b0000_1000;
const OFFSET_HIGH_MASK: u8 = 0b0000_0111;

/// Fields shared by First and Subsequent Segments.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// 4 bit session id.
    pub session_id: u8,
    /// Size of the whole datagram.
    pub datagram_size: u16,
    /// Offset of `partial_datagram` in the datagram, always 0 for the first segment.
    pub datagram_offset: u16,
    /// Optional header extension.
    pub header_extension: Option<Vec<u8>>,
    /// Datagram bytes carried by this segment.
    pub partial_datagram: Vec<u8>,
    /// The reassembled command, set on the segment that completed the datagram.
    pub encapsulated: Option<Box<CommandClass>>,
}

impl Segment {
    /// Create a segment without header extension.
    pub fn new(session_id: u8, datagram_size: u16, datagram_offset: u16, data: Vec<u8>) -> Self {
        Self {
            session_id,
            datagram_size,
            datagram_offset,
            header_extension: None,
            partial_datagram: data,
            encapsulated: None,
        }
    }

    /// End of this segment's data in the datagram (exclusive).
    pub fn end(&self) -> usize {
        self.datagram_offset as usize + self.partial_datagram.len()
    }

    fn check_bounds(&self) -> std::result::Result<(), PacketError> {
        if self.end() > self.datagram_size as usize {
            return Err(PacketError::InvalidPayload(format!(
                "segment at offset {} with {} bytes exceeds datagram size {}",
                self.datagram_offset,
                self.partial_datagram.len(),
                self.datagram_size
            )));
        }
        Ok(())
    }
}

/// Mark every datagram byte covered by `segments`.
///
/// Segments of a different datagram size are ignored.
pub fn coverage(datagram_size: u16, segments: &[&Segment]) -> Vec<bool> {
    let size = datagram_size as usize;
    let mut covered = vec![false; size];
    for segment in segments.iter().filter(|s| s.datagram_size == datagram_size) {
        let start = (segment.datagram_offset as usize).min(size);
        let end = segment.end().min(size);
        covered[start..end].fill(true);
    }
    covered
}

/// Commands of the Transport Service command class.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportServiceCc {
    /// First segment of a datagram.
    FirstSegment(Segment),
    /// Any later segment of a datagram.
    SubsequentSegment(Segment),
    /// Ask the sender to retransmit from an offset.
    SegmentRequest {
        /// Session of the datagram.
        session_id: u8,
        /// Offset of the first missing byte.
        datagram_offset: u16,
    },
    /// The whole datagram was received.
    SegmentComplete {
        /// Session of the datagram.
        session_id: u8,
    },
    /// The receiver is busy with other sessions.
    SegmentWait {
        /// Number of segments still pending on the receiver.
        pending_segments: u8,
    },
}

impl TransportServiceCc {
    /// The segment fields, for First and Subsequent Segments.
    pub fn segment(&self) -> Option<&Segment> {
        match self {
            TransportServiceCc::FirstSegment(s) | TransportServiceCc::SubsequentSegment(s) => Some(s),
            _ => None,
        }
    }

    /// Take the segment fields out of a First or Subsequent Segment.
    pub fn into_segment(self) -> Option<Segment> {
        match self {
            TransportServiceCc::FirstSegment(s) | TransportServiceCc::SubsequentSegment(s) => Some(s),
            _ => None,
        }
    }

    fn segment_mut(&mut self) -> Option<&mut Segment> {
        match self {
            TransportServiceCc::FirstSegment(s) | TransportServiceCc::SubsequentSegment(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a Transport Service command.
    ///
    /// Segments are rejected when their checksum does not match or their
    /// data would overflow the announced datagram size.
    pub fn parse(
        header: &CcHeader,
        payload: &[u8],
        _ctx: &mut ParsingContext<'_>,
    ) -> Result<CommandClass> {
        let base = header.command & TS_COMMAND_MASK;
        let size_high = (header.command & TS_SIZE_HIGH_MASK) as u16;

        let cc = match base {
            TS_FIRST_SEGMENT | TS_SUBSEQUENT_SEGMENT => {
                let first = base == TS_FIRST_SEGMENT;
                let segment = parse_segment(header, payload, size_high, first)?;
                trace!(
                    session_id = segment.session_id,
                    offset = segment.datagram_offset,
                    len = segment.partial_datagram.len(),
                    size = segment.datagram_size,
                    "received segment"
                );
                if first {
                    TransportServiceCc::FirstSegment(segment)
                } else {
                    TransportServiceCc::SubsequentSegment(segment)
                }
            }
            TS_SEGMENT_REQUEST => {
                validate_len(payload, 2)?;
                TransportServiceCc::SegmentRequest {
                    session_id: payload[0] >> SESSION_ID_SHIFT,
                    datagram_offset: (((payload[0] & OFFSET_HIGH_MASK) as u16) << 8)
                        | payload[1] as u16,
                }
            }
            TS_SEGMENT_COMPLETE => {
                validate_len(payload, 1)?;
                TransportServiceCc::SegmentComplete {
                    session_id: payload[0] >> SESSION_ID_SHIFT,
                }
            }
            TS_SEGMENT_WAIT => {
                validate_len(payload, 1)?;
                TransportServiceCc::SegmentWait {
                    pending_segments: payload[0],
                }
            }
            other => {
                return Err(PacketError::Invalid(format!(
                    "unknown transport service command 0x{other:02x}"
                ))
                .into());
            }
        };
        Ok(CommandClass::TransportService(cc))
    }

    /// Whether this segment discards the segments buffered before it.
    ///
    /// A First Segment only restarts the session if the buffered segments
    /// already contain a first segment or belong to a datagram of another
    /// size, so a first segment arriving late still completes its datagram.
    pub(crate) fn starts_session(&self, session: &[&Segment]) -> bool {
        let TransportServiceCc::FirstSegment(first) = self else {
            return false;
        };
        session.iter().any(|s| s.datagram_offset == 0 || s.datagram_size != first.datagram_size)
    }

    /// Whether bytes of the datagram are still missing after `session`.
    ///
    /// Rebuilds the coverage of the whole datagram on every call.
    pub(crate) fn expect_more_messages(&self, session: &[&Segment]) -> bool {
        let Some(own) = self.segment() else {
            return false;
        };
        coverage(own.datagram_size, session).contains(&false)
    }

    /// Reassemble the datagram from the earlier segments and this one, then
    /// parse it as a command.
    pub(crate) fn merge_partials(
        &mut self,
        partials: Vec<Segment>,
        ctx: &mut ParsingContext<'_>,
    ) -> Result<()> {
        let Some(own) = self.segment_mut() else {
            return Err(CcError::Invalid("only segments can be merged".into()).into());
        };

        let size = own.datagram_size;
        let mut datagram = vec![0u8; size as usize];
        for segment in partials.iter().chain(std::iter::once(&*own)) {
            if segment.datagram_size != size {
                return Err(PacketError::InvalidPayload(format!(
                    "segment announces datagram size {} instead of {size}",
                    segment.datagram_size
                ))
                .into());
            }
            segment.check_bounds()?;
            let start = segment.datagram_offset as usize;
            datagram[start..segment.end()].copy_from_slice(&segment.partial_datagram);
        }

        trace!(session_id = own.session_id, size, "reassembled datagram");
        own.encapsulated = Some(Box::new(ctx.parse(&datagram)?));
        Ok(())
    }
}

fn parse_segment(
    header: &CcHeader,
    payload: &[u8],
    size_high: u16,
    first: bool,
) -> std::result::Result<Segment, PacketError> {
    let fixed = if first { 2 } else { 3 };
    validate_len(payload, fixed + TS_CHECKSUM_SIZE)?;

    let body_end = payload.len() - TS_CHECKSUM_SIZE;
    let expected = u16::from_be_bytes([payload[body_end], payload[body_end + 1]]);
    let actual = segment_checksum(header.command, &payload[..body_end]);
    if expected != actual {
        return Err(PacketError::Checksum { expected, actual });
    }

    let datagram_size = (size_high << 8) | payload[0] as u16;
    let session_id = payload[1] >> SESSION_ID_SHIFT;
    let has_extension = payload[1] & HEADER_EXTENSION_FLAG != 0;
    let datagram_offset = if first {
        0
    } else {
        (((payload[1] & OFFSET_HIGH_MASK) as u16) << 8) | payload[2] as u16
    };

    let mut pos = fixed;
    let header_extension = if has_extension {
        validate_len(&payload[..body_end], pos + 1)?;
        let ext_len = payload[pos] as usize;
        validate_len(&payload[..body_end], pos + 1 + ext_len)?;
        let ext = payload[pos + 1..pos + 1 + ext_len].to_vec();
        pos += 1 + ext_len;
        Some(ext)
    } else {
        None
    };

    let partial_datagram = payload[pos..body_end].to_vec();
    if partial_datagram.len() > MAX_SEGMENT_SIZE {
        return Err(PacketError::InvalidPayload(format!(
            "segment carries {} bytes, at most {MAX_SEGMENT_SIZE} allowed",
            partial_datagram.len()
        )));
    }

    let segment = Segment {
        session_id,
        datagram_size,
        datagram_offset,
        header_extension,
        partial_datagram,
        encapsulated: None,
    };
    segment.check_bounds()?;
    Ok(segment)
}

/// CRC16 of a segment: command class id, command byte and payload before the checksum.
pub fn segment_checksum(command: u8, body: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(&[CC_TRANSPORT_SERVICE as u8, command]).update(body);
    crc.value()
}

fn size_high_bits(datagram_size: u16) -> u8 {
    ((datagram_size >> 8) as u8) & TS_SIZE_HIGH_MASK
}

fn segment_body(segment: &Segment, first: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(5 + segment.partial_datagram.len());
    body.push(segment.datagram_size as u8);

    let mut flags = segment.session_id << SESSION_ID_SHIFT;
    if segment.header_extension.is_some() {
        flags |= HEADER_EXTENSION_FLAG;
    }
    if first {
        body.push(flags);
    } else {
        body.push(flags | (((segment.datagram_offset >> 8) as u8) & OFFSET_HIGH_MASK));
        body.push(segment.datagram_offset as u8);
    }

    if let Some(ext) = &segment.header_extension {
        body.push(ext.len() as u8);
        body.extend_from_slice(ext);
    }
    body.extend_from_slice(&segment.partial_datagram);
    body
}

impl CcPayload for TransportServiceCc {
    fn cc_id(&self) -> u16 {
        CC_TRANSPORT_SERVICE
    }

    fn cc_command(&self) -> u8 {
        match self {
            TransportServiceCc::FirstSegment(s) => TS_FIRST_SEGMENT | size_high_bits(s.datagram_size),
            TransportServiceCc::SubsequentSegment(s) => {
                TS_SUBSEQUENT_SEGMENT | size_high_bits(s.datagram_size)
            }
            TransportServiceCc::SegmentRequest { .. } => TS_SEGMENT_REQUEST,
            TransportServiceCc::SegmentComplete { .. } => TS_SEGMENT_COMPLETE,
            TransportServiceCc::SegmentWait { .. } => TS_SEGMENT_WAIT,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            TransportServiceCc::FirstSegment(s) | TransportServiceCc::SubsequentSegment(s) => {
                let first = matches!(self, TransportServiceCc::FirstSegment(_));
                let mut body = segment_body(s, first);
                let crc = segment_checksum(self.cc_command(), &body);
                body.extend_from_slice(&crc.to_be_bytes());
                body
            }
            TransportServiceCc::SegmentRequest {
                session_id,
                datagram_offset,
            } => vec![
                (session_id << SESSION_ID_SHIFT)
                    | (((datagram_offset >> 8) as u8) & OFFSET_HIGH_MASK),
                *datagram_offset as u8,
            ],
            TransportServiceCc::SegmentComplete { session_id } => {
                vec![session_id << SESSION_ID_SHIFT]
            }
            TransportServiceCc::SegmentWait { pending_segments } => vec![*pending_segments],
        }
    }
}
