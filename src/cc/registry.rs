//! Command class id to parser lookup.

use std::collections::HashMap;

use tracing::trace;

use crate::codec::CcHeader;
use crate::core::{CC_BASIC, CC_SECURITY, CC_TRANSPORT_SERVICE, Result};
use crate::security::SecurityCc;
use crate::transport_service::TransportServiceCc;

use super::{BasicCc, CommandClass, ParsingContext, RawCc};

/// Parser for one command class: header, payload after the command byte
/// and the parsing context.
pub type ParseFn = fn(&CcHeader, &[u8], &mut ParsingContext<'_>) -> Result<CommandClass>;

/// Table of command class parsers, populated at startup.
///
/// Frames of unregistered command classes parse as [`CommandClass::Raw`].
#[derive(Debug, Clone)]
pub struct CcRegistry {
    parsers: HashMap<u16, ParseFn>,
}

impl Default for CcRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(CC_BASIC, BasicCc::parse);
        registry.register(CC_SECURITY, SecurityCc::parse);
        registry.register(CC_TRANSPORT_SERVICE, TransportServiceCc::parse);
        registry
    }
}

impl CcRegistry {
    /// Create a registry without any parser.
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Register or replace the parser of a command class.
    pub fn register(&mut self, cc_id: u16, parser: ParseFn) -> &mut Self {
        self.parsers.insert(cc_id, parser);
        self
    }

    /// Remove the parser of a command class.
    pub fn unregister(&mut self, cc_id: u16) {
        self.parsers.remove(&cc_id);
    }

    /// Check if a parser exists for a command class.
    pub fn is_registered(&self, cc_id: u16) -> bool {
        self.parsers.contains_key(&cc_id)
    }

    /// Parse a frame, dispatching on its command class id.
    pub fn parse(&self, data: &[u8], ctx: &mut ParsingContext<'_>) -> Result<CommandClass> {
        let (header, payload) = CcHeader::parse(data)?;
        match self.parsers.get(&header.cc_id) {
            Some(parser) => parser(&header, payload, ctx),
            None => {
                trace!(cc_id = header.cc_id, "no parser registered, keeping raw");
                Ok(CommandClass::Raw(RawCc {
                    cc_id: header.cc_id,
                    command: header.command,
                    payload: payload.to_vec(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_basic_get(
        _header: &CcHeader,
        _payload: &[u8],
        _ctx: &mut ParsingContext<'_>,
    ) -> Result<CommandClass> {
        Ok(CommandClass::Basic(BasicCc::Get))
    }

    #[test]
    fn test_unknown_cc_is_raw() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(2, 1, &registry);
        let cc = ctx.parse(&[0x25, 0x03, 0xFF]).unwrap();
        assert_eq!(
            cc,
            CommandClass::Raw(RawCc {
                cc_id: 0x25,
                command: 0x03,
                payload: vec![0xFF],
            })
        );
    }

    #[test]
    fn test_extended_cc_is_raw() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(2, 1, &registry);
        let cc = ctx.parse(&[0xF1, 0x00, 0x01, 0xAA]).unwrap();
        assert_eq!(cc.cc_id(), 0xF100);
        assert_eq!(cc.cc_command(), 0x01);
    }

    #[test]
    fn test_custom_parser() {
        let mut registry = CcRegistry::empty();
        assert!(!registry.is_registered(0x25));
        registry.register(0x25, always_basic_get);
        let mut ctx = ParsingContext::new(2, 1, &registry);
        assert_eq!(ctx.parse(&[0x25, 0x01]).unwrap(), CommandClass::Basic(BasicCc::Get));

        registry.unregister(0x25);
        assert!(!registry.is_registered(0x25));
    }

    #[test]
    fn test_truncated_header() {
        let registry = CcRegistry::default();
        let mut ctx = ParsingContext::new(2, 1, &registry);
        assert!(ctx.parse(&[0x20]).unwrap_err().is_silent_drop());
    }
}
