//! Primitive serialization for command class frames.
//!
//! - **CRC16**: [`Crc16`] and [`zwave_crc16`] (CRC-CCITT polynomial 0x1021)
//! - **Headers**: [`CcHeader`] with support for two-byte (extended) ids
//!
//! ```text
//! +-----------------+-------------+-------------------+
//! | CC id (1 or 2)  | command (1) | payload (0..N)    |
//! +-----------------+-------------+-------------------+
//! ```

mod crc;
mod header;

pub use crc::*;
pub use header::*;
