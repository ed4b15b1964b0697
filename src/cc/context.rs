//! Contexts threaded through parsing and encoding.
//!
//! Both carry the node ids of the exchange and, when security is
//! configured, an exclusive borrow of the [`SecurityManager`]. There is no
//! global security state.

use crate::core::{NodeId, PacketError, Result, SecurityError};
use crate::security::SecurityManager;

use super::{CcRegistry, CommandClass};

/// Deepest encapsulation nesting that is followed when parsing.
pub const MAX_ENCAPSULATION_DEPTH: usize = 4;

/// State available while parsing a received frame.
#[derive(Debug)]
pub struct ParsingContext<'a> {
    /// Node the frame came from.
    pub source_node_id: NodeId,
    /// Node id of the controller.
    pub own_node_id: NodeId,
    /// S0 security manager, if security is configured.
    pub security_manager: Option<&'a mut SecurityManager>,
    registry: &'a CcRegistry,
    depth: usize,
}

impl<'a> ParsingContext<'a> {
    /// Create a context without security.
    pub fn new(source_node_id: NodeId, own_node_id: NodeId, registry: &'a CcRegistry) -> Self {
        Self {
            source_node_id,
            own_node_id,
            security_manager: None,
            registry,
            depth: 0,
        }
    }

    /// Attach a security manager.
    pub fn with_security(mut self, manager: &'a mut SecurityManager) -> Self {
        self.security_manager = Some(manager);
        self
    }

    /// The parser registry.
    pub fn registry(&self) -> &'a CcRegistry {
        self.registry
    }

    /// The security manager, or `DriverNoSecurity` if none is configured.
    pub fn security_manager(&mut self) -> std::result::Result<&mut SecurityManager, SecurityError> {
        self.security_manager
            .as_deref_mut()
            .ok_or_else(|| SecurityError::NotInitialized("no S0 network key configured".into()))
    }

    /// Parse a complete command class frame.
    ///
    /// This is the recursive entry point used for top-level frames and for
    /// the decrypted or reassembled contents of encapsulations.
    pub fn parse(&mut self, data: &[u8]) -> Result<CommandClass> {
        if self.depth >= MAX_ENCAPSULATION_DEPTH {
            return Err(PacketError::Invalid("encapsulation nested too deeply".into()).into());
        }
        let registry = self.registry;
        self.depth += 1;
        let parsed = registry.parse(data, self);
        self.depth -= 1;
        parsed
    }
}

/// State available while serializing a command.
#[derive(Debug)]
pub struct EncodingContext<'a> {
    /// Node id of the controller.
    pub own_node_id: NodeId,
    /// Node the command is sent to.
    pub destination_node_id: NodeId,
    /// S0 security manager, if security is configured.
    pub security_manager: Option<&'a mut SecurityManager>,
}

impl<'a> EncodingContext<'a> {
    /// Create a context without security.
    pub fn new(own_node_id: NodeId, destination_node_id: NodeId) -> Self {
        Self {
            own_node_id,
            destination_node_id,
            security_manager: None,
        }
    }

    /// Attach a security manager.
    pub fn with_security(mut self, manager: &'a mut SecurityManager) -> Self {
        self.security_manager = Some(manager);
        self
    }

    /// The security manager, or `DriverNoSecurity` if none is configured.
    pub fn security_manager(&mut self) -> std::result::Result<&mut SecurityManager, SecurityError> {
        self.security_manager
            .as_deref_mut()
            .ok_or_else(|| SecurityError::NotInitialized("no S0 network key configured".into()))
    }
}
