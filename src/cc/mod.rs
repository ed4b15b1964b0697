//! Command class model and dispatch.
//!
//! Every parsed frame becomes a [`CommandClass`]. Parsers are looked up by
//! command class id in a [`CcRegistry`]; ids without a parser keep their
//! bytes as [`RawCc`].

mod basic;
mod context;
mod registry;

pub use basic::*;
pub use context::*;
pub use registry::*;

use crate::codec::encode_cc;
use crate::core::{CC_SECURITY, CcError, CcPayload, PartialCc, PartialSessionId, Result};
use crate::security::SecurityCc;
use crate::transport_service::{Segment, TransportServiceCc};

/// A parsed command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandClass {
    /// Basic command class.
    Basic(BasicCc),
    /// Security (S0) command class.
    Security(SecurityCc),
    /// Transport Service command class.
    TransportService(TransportServiceCc),
    /// Any command class without a registered parser.
    Raw(RawCc),
}

impl CommandClass {
    /// Command class id.
    pub fn cc_id(&self) -> u16 {
        match self {
            CommandClass::Basic(cc) => cc.cc_id(),
            CommandClass::Security(_) => CC_SECURITY,
            CommandClass::TransportService(cc) => cc.cc_id(),
            CommandClass::Raw(cc) => cc.cc_id,
        }
    }

    /// Command byte as it appears on the wire.
    pub fn cc_command(&self) -> u8 {
        match self {
            CommandClass::Basic(cc) => cc.cc_command(),
            CommandClass::Security(cc) => cc.cc_command(),
            CommandClass::TransportService(cc) => cc.cc_command(),
            CommandClass::Raw(cc) => cc.command,
        }
    }

    /// Serialize into a fresh buffer.
    ///
    /// Only S0 encapsulation touches `ctx`; every other command is a pure
    /// function of its fields.
    pub fn serialize(&self, ctx: &mut EncodingContext<'_>) -> Result<Vec<u8>> {
        match self {
            CommandClass::Security(cc) => cc.serialize(ctx),
            CommandClass::Basic(cc) => Ok(encode_cc(cc.cc_id(), cc.cc_command(), &cc.payload())),
            CommandClass::TransportService(cc) => {
                Ok(encode_cc(cc.cc_id(), cc.cc_command(), &cc.payload()))
            }
            CommandClass::Raw(cc) => Ok(encode_cc(cc.cc_id, cc.command, &cc.payload)),
        }
    }

    /// The command carried inside an encapsulation, if already parsed.
    pub fn encapsulated(&self) -> Option<&CommandClass> {
        match self {
            CommandClass::Security(SecurityCc::CommandEncapsulation(e)) => e.encapsulated.as_deref(),
            CommandClass::TransportService(cc) => cc.segment().and_then(|s| s.encapsulated.as_deref()),
            _ => None,
        }
    }

    /// Follow encapsulations down to the innermost parsed command.
    pub fn innermost(&self) -> &CommandClass {
        let mut current = self;
        while let Some(inner) = current.encapsulated() {
            current = inner;
        }
        current
    }

    /// Check if the sender expects a Security Nonce Report in return.
    pub fn requests_nonce(&self) -> bool {
        matches!(self, CommandClass::Security(cc) if cc.requests_nonce())
    }

    fn as_segment(&self) -> Option<&Segment> {
        match self {
            CommandClass::TransportService(cc) => cc.segment(),
            _ => None,
        }
    }
}

fn segments_of(session: &[CommandClass]) -> Vec<&Segment> {
    session.iter().filter_map(CommandClass::as_segment).collect()
}

fn mismatched(expected: &str, got: &CommandClass) -> CcError {
    CcError::Invalid(format!(
        "cannot merge command class 0x{:02x} into a {expected} session",
        got.cc_id()
    ))
}

impl PartialCc for CommandClass {
    fn cc_id(&self) -> u16 {
        CommandClass::cc_id(self)
    }

    fn partial_session_id(&self) -> Option<PartialSessionId> {
        match self {
            CommandClass::Security(cc) => cc
                .sequence()
                .map(|sequence| PartialSessionId::Security { sequence }),
            CommandClass::TransportService(cc) => cc
                .segment()
                .map(|s| PartialSessionId::TransportService {
                    session_id: s.session_id,
                }),
            _ => None,
        }
    }

    fn starts_session(&self, session: &[Self]) -> bool {
        match self {
            CommandClass::Security(cc) => cc.starts_session(),
            CommandClass::TransportService(cc) => cc.starts_session(&segments_of(session)),
            _ => false,
        }
    }

    fn supersedes(&self, buffered: &Self) -> bool {
        match (self.as_segment(), buffered.as_segment()) {
            (Some(new), Some(old)) => new.datagram_offset == old.datagram_offset,
            _ => false,
        }
    }

    fn expect_more_messages(&self, session: &[Self]) -> bool {
        match self {
            CommandClass::Security(cc) => cc.expect_more_messages(),
            CommandClass::TransportService(cc) => cc.expect_more_messages(&segments_of(session)),
            _ => false,
        }
    }

    fn merge_partials(&mut self, partials: Vec<Self>, ctx: &mut ParsingContext<'_>) -> Result<()> {
        match self {
            CommandClass::Security(cc) => {
                let mut frames = Vec::with_capacity(partials.len());
                for partial in partials {
                    match partial {
                        CommandClass::Security(p) => frames.push(p),
                        other => return Err(mismatched("Security", &other).into()),
                    }
                }
                cc.merge_partials(frames, ctx)
            }
            CommandClass::TransportService(cc) => {
                let mut segments = Vec::with_capacity(partials.len());
                for partial in partials {
                    match partial {
                        CommandClass::TransportService(p) => match p.into_segment() {
                            Some(segment) => segments.push(segment),
                            None => {
                                return Err(CcError::Invalid(
                                    "transport service session holds a non-segment command".into(),
                                )
                                .into());
                            }
                        },
                        other => return Err(mismatched("Transport Service", &other).into()),
                    }
                }
                cc.merge_partials(segments, ctx)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCode;

    #[test]
    fn test_serialize_is_pure() {
        let cc = CommandClass::Basic(BasicCc::Set { target_value: 0x10 });
        let mut ctx = EncodingContext::new(1, 2);
        let first = cc.serialize(&mut ctx).unwrap();
        let second = cc.serialize(&mut ctx).unwrap();
        assert_eq!(first, vec![0x20, 0x01, 0x10]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_raw_round_trip() {
        let registry = CcRegistry::default();
        let bytes = [0x86, 0x12, 0x01, 0x02];
        let mut ctx = ParsingContext::new(3, 1, &registry);
        let cc = ctx.parse(&bytes).unwrap();
        assert_eq!(cc.serialize(&mut EncodingContext::new(1, 3)).unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_plain_commands_have_no_session() {
        let cc = CommandClass::Basic(BasicCc::Get);
        assert_eq!(cc.partial_session_id(), None);
        assert!(!cc.expect_more_messages(std::slice::from_ref(&cc)));
        assert_eq!(cc.innermost(), &cc);
        assert!(!cc.requests_nonce());
    }

    #[test]
    fn test_security_serialize_without_manager() {
        let cc = CommandClass::Security(SecurityCc::CommandEncapsulation(
            crate::security::Encapsulation::new(vec![0x20, 0x02]),
        ));
        let err = cc.serialize(&mut EncodingContext::new(1, 2)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DriverNoSecurity);
    }
}
