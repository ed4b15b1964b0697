//! Basic command class and the raw fallback.

use crate::codec::CcHeader;
use crate::core::{CC_BASIC, CcError, CcPayload, Result, validate_len};

use super::{CommandClass, ParsingContext};

const BASIC_SET: u8 = 0x01;
const BASIC_GET: u8 = 0x02;
const BASIC_REPORT: u8 = 0x03;

/// Commands of the Basic command class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicCc {
    /// Set the value.
    Set {
        /// Target value.
        target_value: u8,
    },
    /// Request the value.
    Get,
    /// Current value.
    Report {
        /// Current value.
        current_value: u8,
    },
}

impl BasicCc {
    /// Parse a Basic command.
    pub fn parse(
        header: &CcHeader,
        payload: &[u8],
        _ctx: &mut ParsingContext<'_>,
    ) -> Result<CommandClass> {
        let cc = match header.command {
            BASIC_SET => {
                validate_len(payload, 1)?;
                BasicCc::Set {
                    target_value: payload[0],
                }
            }
            BASIC_GET => BasicCc::Get,
            BASIC_REPORT => {
                validate_len(payload, 1)?;
                BasicCc::Report {
                    current_value: payload[0],
                }
            }
            other => {
                return Err(CcError::NotImplemented(format!("Basic command 0x{other:02x}")).into());
            }
        };
        Ok(CommandClass::Basic(cc))
    }
}

impl CcPayload for BasicCc {
    fn cc_id(&self) -> u16 {
        CC_BASIC
    }

    fn cc_command(&self) -> u8 {
        match self {
            BasicCc::Set { .. } => BASIC_SET,
            BasicCc::Get => BASIC_GET,
            BasicCc::Report { .. } => BASIC_REPORT,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            BasicCc::Set { target_value } => vec![*target_value],
            BasicCc::Get => Vec::new(),
            BasicCc::Report { current_value } => vec![*current_value],
        }
    }
}

/// A command of a class without a registered parser.
///
/// The bytes are kept verbatim for the higher layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCc {
    /// Command class id.
    pub cc_id: u16,
    /// Command byte.
    pub command: u8,
    /// Payload after the command byte.
    pub payload: Vec<u8>,
}

impl CcPayload for RawCc {
    fn cc_id(&self) -> u16 {
        self.cc_id
    }

    fn cc_command(&self) -> u8 {
        self.command
    }

    fn payload(&self) -> Vec<u8> {
        self.payload.clone()
    }
}
