//! Transport Service: segmentation of datagrams larger than one frame.
//!
//! Each segment carries at most 39 datagram bytes and its own CRC16.
//! Receiving segments are grouped by the partial session manager; once
//! every byte of a datagram is covered the last segment reassembles it
//! and parses the contents as a command.

mod segment;
mod segmenter;
mod sender;

pub use segment::*;
pub use segmenter::*;
pub use sender::*;
