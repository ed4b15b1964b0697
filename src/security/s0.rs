//! Security (S0) command class.
//!
//! Wire format of a Command Encapsulation payload:
//!
//! ```text
//! +----------------+----------------------+----------+-------------+
//! | sender nonce 8 | ciphertext (>= 1)    | nonce id | auth code 8 |
//! +----------------+----------------------+----------+-------------+
//! ```
//!
//! The first decrypted byte is the frame control byte, the remainder is the
//! inner command. The auth code is a CBC-MAC over
//! `sender nonce || receiver nonce || command || src || dst || len || ciphertext`
//! and is checked before anything is decrypted.

use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::cc::{CommandClass, EncodingContext, ParsingContext};
use crate::codec::{CcHeader, encode_cc, is_extended_cc_id};
use crate::core::{
    CC_SECURITY, CcError, EXTENDED_CC_PREFIX_MIN, Error, MAX_CLASSIC_NODE_ID, NETWORK_KEY_SIZE,
    NodeId, PacketError, Result, S0_AUTH_CODE_SIZE, S0_FLAG_SECOND_FRAME, S0_FLAG_SEQUENCED,
    S0_HALF_NONCE_SIZE, S0_MAX_SINGLE_FRAME_PAYLOAD, S0_MIN_ENCAPSULATION_SIZE, S0_SCHEME_0,
    S0_SEQUENCE_COUNTER_MASK, SECURITY_COMMAND_ENCAPSULATION,
    SECURITY_COMMAND_ENCAPSULATION_NONCE_GET, SECURITY_COMMANDS_SUPPORTED_GET,
    SECURITY_COMMANDS_SUPPORTED_REPORT, SECURITY_NETWORK_KEY_SET, SECURITY_NETWORK_KEY_VERIFY,
    SECURITY_NONCE_GET, SECURITY_NONCE_REPORT, SECURITY_SCHEME_GET, SECURITY_SCHEME_INHERIT,
    SECURITY_SCHEME_REPORT, SecurityError, validate_len,
};
use crate::crypto::{
    NetworkKey, S0Keys, compute_mac, decrypt_aes128_ofb, encrypt_aes128_ofb, random_bytes,
};

use super::manager::SecurityManager;
use super::nonce::NonceBytes;

/// Separates supported from controlled command classes in a Commands
/// Supported Report.
const COMMAND_CLASS_MARK: u8 = 0xEF;

// =============================================================================
// FRAME CONTROL
// =============================================================================

/// First decrypted byte of an encapsulated command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameControl {
    /// The command is split over two frames.
    pub sequenced: bool,
    /// This is the second of the two frames.
    pub second_frame: bool,
    /// 4 bit counter shared by both frames of a sequence.
    pub sequence_counter: u8,
}

impl FrameControl {
    /// Decode from the wire byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            sequenced: byte & S0_FLAG_SEQUENCED != 0,
            second_frame: byte & S0_FLAG_SECOND_FRAME != 0,
            sequence_counter: byte & S0_SEQUENCE_COUNTER_MASK,
        }
    }

    /// Encode to the wire byte.
    pub fn to_byte(self) -> u8 {
        let mut byte = self.sequence_counter & S0_SEQUENCE_COUNTER_MASK;
        if self.sequenced {
            byte |= S0_FLAG_SEQUENCED;
        }
        if self.second_frame {
            byte |= S0_FLAG_SECOND_FRAME;
        }
        byte
    }
}

// =============================================================================
// ENCAPSULATION
// =============================================================================

/// Which of the two encapsulation commands carries the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncapsulationKind {
    /// Command Encapsulation.
    #[default]
    Plain,
    /// Command Encapsulation with a piggybacked Nonce Get.
    NonceGet,
}

impl EncapsulationKind {
    /// Command byte on the wire.
    pub fn command(self) -> u8 {
        match self {
            EncapsulationKind::Plain => SECURITY_COMMAND_ENCAPSULATION,
            EncapsulationKind::NonceGet => SECURITY_COMMAND_ENCAPSULATION_NONCE_GET,
        }
    }

    fn from_command(command: u8) -> Option<Self> {
        match command {
            SECURITY_COMMAND_ENCAPSULATION => Some(EncapsulationKind::Plain),
            SECURITY_COMMAND_ENCAPSULATION_NONCE_GET => Some(EncapsulationKind::NonceGet),
            _ => None,
        }
    }
}

/// One S0 encapsulated frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Encapsulation {
    /// Encapsulation command used.
    pub kind: EncapsulationKind,
    /// Sequencing information.
    pub frame_control: FrameControl,
    /// Inner command bytes carried by this frame.
    pub payload: Vec<u8>,
    /// The parsed inner command, once all frames of a sequence are known.
    pub encapsulated: Option<Box<CommandClass>>,
}

impl Encapsulation {
    /// Wrap serialized inner command bytes into a single frame.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            kind: EncapsulationKind::Plain,
            frame_control: FrameControl::default(),
            payload,
            encapsulated: None,
        }
    }

    /// Request a nonce from the receiver along with this frame.
    pub fn with_nonce_get(mut self) -> Self {
        self.kind = EncapsulationKind::NonceGet;
        self
    }

    /// Is this the first half of a two-frame command?
    pub fn is_first_of_sequence(&self) -> bool {
        self.frame_control.sequenced && !self.frame_control.second_frame
    }

    /// Join the earlier frame of a sequence with this one and parse the result.
    fn merge(&mut self, firsts: Vec<Encapsulation>, ctx: &mut ParsingContext<'_>) -> Result<()> {
        if !self.frame_control.sequenced {
            return Ok(());
        }
        if !firsts.iter().any(Encapsulation::is_first_of_sequence) {
            return Err(PacketError::InvalidPayload(
                "second S0 frame received without the first one".into(),
            )
            .into());
        }

        let mut bytes = Vec::new();
        for first in firsts.iter().filter(|f| f.is_first_of_sequence()) {
            bytes.extend_from_slice(&first.payload);
        }
        bytes.extend_from_slice(&self.payload);

        self.payload = bytes;
        self.encapsulated = Some(Box::new(ctx.parse(&self.payload)?));
        Ok(())
    }
}

/// Split inner command bytes into one or two frames.
///
/// Commands longer than one frame can carry are sent as a sequence. The
/// first frame asks for a nonce so that the second one can be encrypted.
pub fn split_for_sequencing(inner: &[u8], sequence_counter: u8) -> Result<Vec<Encapsulation>> {
    if inner.len() <= S0_MAX_SINGLE_FRAME_PAYLOAD {
        return Ok(vec![Encapsulation::new(inner.to_vec())]);
    }
    if inner.len() > 2 * S0_MAX_SINGLE_FRAME_PAYLOAD {
        return Err(Error::Argument(format!(
            "command of {} bytes does not fit into two S0 frames",
            inner.len()
        )));
    }

    let (head, tail) = inner.split_at(S0_MAX_SINGLE_FRAME_PAYLOAD);
    let counter = sequence_counter & S0_SEQUENCE_COUNTER_MASK;
    Ok(vec![
        Encapsulation {
            kind: EncapsulationKind::NonceGet,
            frame_control: FrameControl {
                sequenced: true,
                second_frame: false,
                sequence_counter: counter,
            },
            payload: head.to_vec(),
            encapsulated: None,
        },
        Encapsulation {
            kind: EncapsulationKind::Plain,
            frame_control: FrameControl {
                sequenced: true,
                second_frame: true,
                sequence_counter: counter,
            },
            payload: tail.to_vec(),
            encapsulated: None,
        },
    ])
}

fn classic_node_id(node_id: NodeId) -> std::result::Result<u8, SecurityError> {
    if node_id > MAX_CLASSIC_NODE_ID {
        return Err(SecurityError::InvalidNodeId(node_id));
    }
    Ok(node_id as u8)
}

/// Build the data the S0 auth code is computed over.
pub fn build_auth_data(
    sender_nonce: &[u8],
    receiver_nonce: &[u8],
    command: u8,
    source: NodeId,
    destination: NodeId,
    ciphertext: &[u8],
) -> std::result::Result<Vec<u8>, SecurityError> {
    let len = u8::try_from(ciphertext.len())
        .map_err(|_| PacketError::InvalidPayload("ciphertext too long".into()))?;
    let mut data = Vec::with_capacity(2 * S0_HALF_NONCE_SIZE + 4 + ciphertext.len());
    data.extend_from_slice(sender_nonce);
    data.extend_from_slice(receiver_nonce);
    data.push(command);
    data.push(classic_node_id(source)?);
    data.push(classic_node_id(destination)?);
    data.push(len);
    data.extend_from_slice(ciphertext);
    Ok(data)
}

fn s0_iv(sender_nonce: &[u8], receiver_nonce: &[u8]) -> Vec<u8> {
    let mut iv = Vec::with_capacity(2 * S0_HALF_NONCE_SIZE);
    iv.extend_from_slice(sender_nonce);
    iv.extend_from_slice(receiver_nonce);
    iv
}

/// Encrypt and authenticate a frame.
///
/// Returns the Command Encapsulation payload (without the command class
/// header). `receiver_nonce` is the nonce the destination handed out and
/// must be exactly 8 bytes; the caller must not use it again.
pub fn encode_encapsulation(
    encapsulation: &Encapsulation,
    keys: &S0Keys,
    sender_nonce: &NonceBytes,
    receiver_nonce: &[u8],
    source: NodeId,
    destination: NodeId,
) -> std::result::Result<Vec<u8>, SecurityError> {
    if receiver_nonce.len() != S0_HALF_NONCE_SIZE {
        return Err(SecurityError::NoNonce {
            node_id: destination,
        });
    }

    let mut plaintext = Vec::with_capacity(1 + encapsulation.payload.len());
    plaintext.push(encapsulation.frame_control.to_byte());
    plaintext.extend_from_slice(&encapsulation.payload);

    let iv = s0_iv(sender_nonce, receiver_nonce);
    let ciphertext = encrypt_aes128_ofb(&plaintext, keys.encryption_key(), &iv)?;

    let auth_data = build_auth_data(
        sender_nonce,
        receiver_nonce,
        encapsulation.kind.command(),
        source,
        destination,
        &ciphertext,
    )?;
    let auth_code = compute_mac(&auth_data, keys.auth_key())?;

    let mut out = Vec::with_capacity(S0_MIN_ENCAPSULATION_SIZE + ciphertext.len());
    out.extend_from_slice(sender_nonce);
    out.extend_from_slice(&ciphertext);
    out.push(receiver_nonce[0]);
    out.extend_from_slice(&auth_code);
    Ok(out)
}

/// Authenticate and decrypt a received Command Encapsulation payload.
///
/// `take_nonce` must return and remove our nonce with the given id. It is
/// called exactly once, before the auth code is checked, so a nonce is
/// consumed even when authentication fails.
pub fn decode_encapsulation<F>(
    command: u8,
    payload: &[u8],
    keys: &S0Keys,
    source: NodeId,
    destination: NodeId,
    take_nonce: F,
) -> std::result::Result<Encapsulation, SecurityError>
where
    F: FnOnce(u8) -> Option<NonceBytes>,
{
    let kind = EncapsulationKind::from_command(command).ok_or_else(|| {
        PacketError::Invalid(format!("0x{command:02x} is not an encapsulation command"))
    })?;
    validate_len(payload, S0_MIN_ENCAPSULATION_SIZE)?;

    let nonce_id_pos = payload.len() - S0_AUTH_CODE_SIZE - 1;
    let sender_nonce = &payload[..S0_HALF_NONCE_SIZE];
    let ciphertext = &payload[S0_HALF_NONCE_SIZE..nonce_id_pos];
    let nonce_id = payload[nonce_id_pos];
    let auth_code = &payload[nonce_id_pos + 1..];

    let receiver_nonce = take_nonce(nonce_id).ok_or(SecurityError::NonceExpired { nonce_id })?;

    let auth_data = build_auth_data(
        sender_nonce,
        &receiver_nonce,
        command,
        source,
        destination,
        ciphertext,
    )?;
    let expected = compute_mac(&auth_data, keys.auth_key())?;
    if !bool::from(expected[..].ct_eq(auth_code)) {
        return Err(SecurityError::InvalidAuthCode);
    }

    let iv = s0_iv(sender_nonce, &receiver_nonce);
    let plaintext = decrypt_aes128_ofb(ciphertext, keys.encryption_key(), &iv)?;

    Ok(Encapsulation {
        kind,
        frame_control: FrameControl::from_byte(plaintext[0]),
        payload: plaintext[1..].to_vec(),
        encapsulated: None,
    })
}

// =============================================================================
// COMMAND CLASS
// =============================================================================

/// Commands of the Security (S0) command class.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityCc {
    /// Ask which command classes are supported securely.
    CommandsSupportedGet,
    /// Securely supported and controlled command classes.
    CommandsSupportedReport {
        /// Number of further reports.
        reports_to_follow: u8,
        /// Supported command classes.
        supported: Vec<u16>,
        /// Controlled command classes.
        controlled: Vec<u16>,
    },
    /// Ask for the supported schemes.
    SchemeGet {
        /// Schemes supported by the sender.
        supported_schemes: u8,
    },
    /// Supported schemes.
    SchemeReport {
        /// Schemes supported by the sender.
        supported_schemes: u8,
    },
    /// Inherit the security scheme during inclusion.
    SchemeInherit {
        /// Scheme to inherit.
        supported_schemes: u8,
    },
    /// Transfer the network key.
    NetworkKeySet {
        /// The new key.
        network_key: NetworkKey,
    },
    /// Confirm that the network key was received.
    NetworkKeyVerify,
    /// Ask for a nonce.
    NonceGet,
    /// A nonce to be used for the next encrypted frame.
    NonceReport {
        /// Nonce bytes.
        nonce: NonceBytes,
    },
    /// An encrypted command.
    CommandEncapsulation(Encapsulation),
}

fn parse_cc_list(data: &[u8]) -> std::result::Result<(Vec<u16>, Vec<u16>), PacketError> {
    let mut supported = Vec::new();
    let mut controlled = Vec::new();
    let mut in_controlled = false;
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        if byte == COMMAND_CLASS_MARK {
            in_controlled = true;
            i += 1;
            continue;
        }
        let cc_id = if byte >= EXTENDED_CC_PREFIX_MIN {
            validate_len(data, i + 2)?;
            let id = u16::from_be_bytes([byte, data[i + 1]]);
            i += 2;
            id
        } else {
            i += 1;
            byte as u16
        };
        if in_controlled {
            controlled.push(cc_id);
        } else {
            supported.push(cc_id);
        }
    }
    Ok((supported, controlled))
}

fn push_cc_id(buf: &mut Vec<u8>, cc_id: u16) {
    if is_extended_cc_id(cc_id) {
        buf.extend_from_slice(&cc_id.to_be_bytes());
    } else {
        buf.push(cc_id as u8);
    }
}

impl SecurityCc {
    /// Command byte on the wire.
    pub fn cc_command(&self) -> u8 {
        match self {
            SecurityCc::CommandsSupportedGet => SECURITY_COMMANDS_SUPPORTED_GET,
            SecurityCc::CommandsSupportedReport { .. } => SECURITY_COMMANDS_SUPPORTED_REPORT,
            SecurityCc::SchemeGet { .. } => SECURITY_SCHEME_GET,
            SecurityCc::SchemeReport { .. } => SECURITY_SCHEME_REPORT,
            SecurityCc::SchemeInherit { .. } => SECURITY_SCHEME_INHERIT,
            SecurityCc::NetworkKeySet { .. } => SECURITY_NETWORK_KEY_SET,
            SecurityCc::NetworkKeyVerify => SECURITY_NETWORK_KEY_VERIFY,
            SecurityCc::NonceGet => SECURITY_NONCE_GET,
            SecurityCc::NonceReport { .. } => SECURITY_NONCE_REPORT,
            SecurityCc::CommandEncapsulation(e) => e.kind.command(),
        }
    }

    /// Scheme Get for scheme 0.
    pub fn scheme_get() -> Self {
        SecurityCc::SchemeGet {
            supported_schemes: S0_SCHEME_0,
        }
    }

    /// Answer a Nonce Get from `requester` with a freshly registered nonce.
    pub fn nonce_report_for(
        manager: &mut SecurityManager,
        requester: NodeId,
    ) -> std::result::Result<Self, SecurityError> {
        let nonce = manager.generate_nonce(requester)?;
        Ok(SecurityCc::NonceReport { nonce })
    }

    /// Check if the sender expects a Nonce Report in return.
    pub fn requests_nonce(&self) -> bool {
        match self {
            SecurityCc::NonceGet => true,
            SecurityCc::CommandEncapsulation(e) => e.kind == EncapsulationKind::NonceGet,
            _ => false,
        }
    }

    /// Payload of the commands that need no key material.
    fn plain_payload(&self) -> Vec<u8> {
        match self {
            SecurityCc::CommandsSupportedReport {
                reports_to_follow,
                supported,
                controlled,
            } => {
                let mut buf = vec![*reports_to_follow];
                for cc in supported {
                    push_cc_id(&mut buf, *cc);
                }
                if !controlled.is_empty() {
                    buf.push(COMMAND_CLASS_MARK);
                    for cc in controlled {
                        push_cc_id(&mut buf, *cc);
                    }
                }
                buf
            }
            SecurityCc::SchemeGet { supported_schemes }
            | SecurityCc::SchemeReport { supported_schemes }
            | SecurityCc::SchemeInherit { supported_schemes } => vec![*supported_schemes],
            SecurityCc::NetworkKeySet { network_key } => network_key.as_bytes().to_vec(),
            SecurityCc::NonceReport { nonce } => nonce.to_vec(),
            SecurityCc::CommandsSupportedGet
            | SecurityCc::NetworkKeyVerify
            | SecurityCc::NonceGet
            | SecurityCc::CommandEncapsulation(_) => Vec::new(),
        }
    }

    /// Serialize the command.
    ///
    /// Encapsulated commands consume one nonce of the destination and draw
    /// a fresh sender nonce; all other commands are a pure function of
    /// their fields.
    pub fn serialize(&self, ctx: &mut EncodingContext<'_>) -> Result<Vec<u8>> {
        let SecurityCc::CommandEncapsulation(encapsulation) = self else {
            return Ok(encode_cc(CC_SECURITY, self.cc_command(), &self.plain_payload()));
        };

        let own = ctx.own_node_id;
        let destination = ctx.destination_node_id;
        classic_node_id(own)?;
        classic_node_id(destination)?;
        let manager = ctx.security_manager()?;
        let receiver_nonce = manager
            .take_free_nonce(destination)
            .ok_or(SecurityError::NoNonce {
                node_id: destination,
            })?;
        let sender_nonce: NonceBytes = random_bytes()?;

        let payload = encode_encapsulation(
            encapsulation,
            manager.keys(),
            &sender_nonce,
            &receiver_nonce,
            own,
            destination,
        )?;
        debug!(
            destination,
            nonce_id = receiver_nonce[0],
            "encapsulated command"
        );
        Ok(encode_cc(CC_SECURITY, encapsulation.kind.command(), &payload))
    }

    /// Parse a Security command.
    ///
    /// Encapsulated commands are authenticated and decrypted with the
    /// security manager of `ctx`. Unsequenced inner commands are parsed
    /// right away; sequenced ones wait for their partial session to merge.
    pub fn parse(
        header: &CcHeader,
        payload: &[u8],
        ctx: &mut ParsingContext<'_>,
    ) -> Result<CommandClass> {
        let cc = match header.command {
            SECURITY_COMMANDS_SUPPORTED_GET => SecurityCc::CommandsSupportedGet,
            SECURITY_COMMANDS_SUPPORTED_REPORT => {
                validate_len(payload, 1)?;
                let (supported, controlled) = parse_cc_list(&payload[1..])?;
                SecurityCc::CommandsSupportedReport {
                    reports_to_follow: payload[0],
                    supported,
                    controlled,
                }
            }
            SECURITY_SCHEME_GET | SECURITY_SCHEME_REPORT | SECURITY_SCHEME_INHERIT => {
                validate_len(payload, 1)?;
                let supported_schemes = payload[0];
                match header.command {
                    SECURITY_SCHEME_GET => SecurityCc::SchemeGet { supported_schemes },
                    SECURITY_SCHEME_REPORT => SecurityCc::SchemeReport { supported_schemes },
                    _ => SecurityCc::SchemeInherit { supported_schemes },
                }
            }
            SECURITY_NETWORK_KEY_SET => {
                validate_len(payload, NETWORK_KEY_SIZE)?;
                SecurityCc::NetworkKeySet {
                    network_key: NetworkKey::from_slice(&payload[..NETWORK_KEY_SIZE])?,
                }
            }
            SECURITY_NETWORK_KEY_VERIFY => SecurityCc::NetworkKeyVerify,
            SECURITY_NONCE_GET => SecurityCc::NonceGet,
            SECURITY_NONCE_REPORT => {
                validate_len(payload, S0_HALF_NONCE_SIZE)?;
                let mut nonce = [0u8; S0_HALF_NONCE_SIZE];
                nonce.copy_from_slice(&payload[..S0_HALF_NONCE_SIZE]);
                SecurityCc::NonceReport { nonce }
            }
            SECURITY_COMMAND_ENCAPSULATION | SECURITY_COMMAND_ENCAPSULATION_NONCE_GET => {
                let source = ctx.source_node_id;
                let own = ctx.own_node_id;
                let manager = ctx.security_manager()?;
                let keys = manager.keys().clone();
                let mut encapsulation = decode_encapsulation(
                    header.command,
                    payload,
                    &keys,
                    source,
                    own,
                    |nonce_id| manager.take_own_nonce(nonce_id),
                )
                .inspect_err(|e| warn!(source, error = %e, "dropping S0 frame"))?;

                if !encapsulation.frame_control.sequenced {
                    encapsulation.encapsulated = Some(Box::new(ctx.parse(&encapsulation.payload)?));
                }
                SecurityCc::CommandEncapsulation(encapsulation)
            }
            other => {
                return Err(CcError::NotImplemented(format!(
                    "Security command 0x{other:02x}"
                ))
                .into());
            }
        };
        Ok(CommandClass::Security(cc))
    }

    /// Complete a sequenced encapsulation with the frames received before it.
    pub(crate) fn merge_partials(
        &mut self,
        partials: Vec<SecurityCc>,
        ctx: &mut ParsingContext<'_>,
    ) -> Result<()> {
        let SecurityCc::CommandEncapsulation(encapsulation) = self else {
            return Ok(());
        };
        let mut firsts = Vec::with_capacity(partials.len());
        for partial in partials {
            match partial {
                SecurityCc::CommandEncapsulation(e) => firsts.push(e),
                other => {
                    return Err(CcError::Invalid(format!(
                        "cannot merge Security command 0x{:02x} into an encapsulation",
                        other.cc_command()
                    ))
                    .into());
                }
            }
        }
        encapsulation.merge(firsts, ctx)
    }

    /// Sequence counter if this frame is part of a two-frame command.
    pub(crate) fn sequence(&self) -> Option<u8> {
        match self {
            SecurityCc::CommandEncapsulation(e) if e.frame_control.sequenced => {
                Some(e.frame_control.sequence_counter)
            }
            _ => None,
        }
    }

    /// Whether more frames are needed after this one.
    pub(crate) fn expect_more_messages(&self) -> bool {
        matches!(self, SecurityCc::CommandEncapsulation(e) if e.is_first_of_sequence())
    }

    /// Whether this frame opens a new sequence.
    pub(crate) fn starts_session(&self) -> bool {
        self.expect_more_messages()
    }
}
