//! Command class header encoding.
//!
//! Ids `0x00..=0xF0` are a single byte. Ids starting with `0xF1..=0xFF`
//! are extended and occupy two bytes (big-endian).

use crate::core::{validate_len, PacketError, EXTENDED_CC_PREFIX_MIN};

/// Check if a command class id needs two bytes on the wire.
pub fn is_extended_cc_id(cc_id: u16) -> bool {
    cc_id >= (EXTENDED_CC_PREFIX_MIN as u16) << 8
}

/// Number of bytes the id occupies given the first byte on the wire.
fn id_len_from_first_byte(first: u8) -> usize {
    if first >= EXTENDED_CC_PREFIX_MIN { 2 } else { 1 }
}

/// Command class id and command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CcHeader {
    /// Command class id.
    pub cc_id: u16,
    /// Command byte.
    pub command: u8,
}

impl CcHeader {
    /// Create a header.
    pub fn new(cc_id: u16, command: u8) -> Self {
        Self { cc_id, command }
    }

    /// Size of the header on the wire.
    pub fn encoded_len(&self) -> usize {
        if is_extended_cc_id(self.cc_id) { 3 } else { 2 }
    }

    /// Bytes of the id alone.
    pub fn id_bytes(&self) -> Vec<u8> {
        if is_extended_cc_id(self.cc_id) {
            self.cc_id.to_be_bytes().to_vec()
        } else {
            vec![self.cc_id as u8]
        }
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.id_bytes();
        buf.push(self.command);
        buf
    }

    /// Parse a header, returning it together with the remaining payload.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        validate_len(data, 2)?;
        let id_len = id_len_from_first_byte(data[0]);
        validate_len(data, id_len + 1)?;

        let cc_id = if id_len == 2 {
            u16::from_be_bytes([data[0], data[1]])
        } else {
            data[0] as u16
        };

        Ok((
            Self {
                cc_id,
                command: data[id_len],
            },
            &data[id_len + 1..],
        ))
    }
}

/// Serialize a complete command class frame.
pub fn encode_cc(cc_id: u16, command: u8, payload: &[u8]) -> Vec<u8> {
    let header = CcHeader::new(cc_id, command);
    let mut buf = Vec::with_capacity(header.encoded_len() + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Read a big-endian u16 at `offset`.
pub fn read_u16_be(data: &[u8], offset: usize) -> Result<u16, PacketError> {
    validate_len(data, offset + 2)?;
    Ok(u16::from_be_bytes([data[offset], data[offset + 1]]))
}
