//! Receive pipeline.
//!
//! A [`Dispatcher`] turns raw command class frames from one node into
//! complete logical commands: it parses the frame (decrypting S0 on the
//! way), feeds multi-frame exchanges through the partial session manager
//! and hands back the merged command once it is complete.

use std::time::Instant;

use tracing::{debug, warn};

use crate::cc::{CcRegistry, CommandClass, ParsingContext};
use crate::config::DriverOptions;
use crate::core::{CC_TRANSPORT_SERVICE, NodeId, PartialSessionId, Result};
use crate::partial::{PartialSessionKey, PartialSessionManager};
use crate::security::{SecurityCc, SecurityManager};
use crate::transport_service::{Segment, TransportServiceCc, segment_request};

/// Parses incoming frames and merges partial sessions.
#[derive(Debug)]
pub struct Dispatcher {
    options: DriverOptions,
    registry: CcRegistry,
    partials: PartialSessionManager<CommandClass>,
}

impl Dispatcher {
    /// Create a dispatcher with the default parser registry.
    pub fn new(options: DriverOptions) -> Self {
        Self::with_registry(options, CcRegistry::default())
    }

    /// Create a dispatcher with a custom parser registry.
    pub fn with_registry(options: DriverOptions, registry: CcRegistry) -> Self {
        Self {
            options,
            registry,
            partials: PartialSessionManager::new(),
        }
    }

    /// Options the dispatcher was created with.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Parser registry, for registering additional command classes.
    pub fn registry_mut(&mut self) -> &mut CcRegistry {
        &mut self.registry
    }

    /// Open partial sessions.
    pub fn partials(&self) -> &PartialSessionManager<CommandClass> {
        &self.partials
    }

    /// Keys of the sessions still waiting for frames.
    pub fn pending_sessions(&self) -> Vec<PartialSessionKey> {
        self.partials.keys().copied().collect()
    }

    /// Handle a frame received from `source`.
    ///
    /// Returns `Ok(None)` while a multi-frame command is incomplete. Nonces
    /// carried by a Nonce Report are stored in `security` before the report
    /// is returned. Frames that fail to parse or authenticate are logged
    /// and returned as errors; no session state is touched by them.
    pub fn handle_frame(
        &mut self,
        source: NodeId,
        data: &[u8],
        security: Option<&mut SecurityManager>,
    ) -> Result<Option<CommandClass>> {
        self.handle_frame_at(source, data, security, Instant::now())
    }

    /// Handle a frame received at `now`.
    pub fn handle_frame_at(
        &mut self,
        source: NodeId,
        data: &[u8],
        security: Option<&mut SecurityManager>,
        now: Instant,
    ) -> Result<Option<CommandClass>> {
        let mut ctx = ParsingContext::new(source, self.options.own_node_id, &self.registry);
        ctx.security_manager = security;

        let result = ctx
            .parse(data)
            .and_then(|cc| {
                store_nonce_report(&cc, &mut ctx);
                self.partials.add_at(source, cc, &mut ctx, now)
            });

        match result {
            Ok(Some(cc)) => {
                debug!(
                    source,
                    cc_id = cc.cc_id(),
                    cc_command = cc.cc_command(),
                    "received command"
                );
                Ok(Some(cc))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                if e.is_silent_drop() {
                    warn!(source, code = ?e.code(), error = %e, "dropping frame");
                } else {
                    debug!(source, code = ?e.code(), error = %e, "failed to handle frame");
                }
                Err(e)
            }
        }
    }

    /// Drop partial sessions that made no progress within the session timeout.
    pub fn abandon_stale(&mut self, now: Instant) -> usize {
        let max_age = self.options.transport_service.session_timeout;
        self.partials.abandon_stale(now, max_age)
    }

    /// Drop every partial session of a node.
    pub fn abandon_node(&mut self, node_id: NodeId) -> usize {
        self.partials.abandon_node(node_id)
    }

    /// Segment Request for the first missing part of a Transport Service
    /// session, if the session is open and incomplete.
    pub fn segment_request_for(&self, source: NodeId, session_id: u8) -> Option<TransportServiceCc> {
        let key = PartialSessionKey {
            node_id: source,
            cc_id: CC_TRANSPORT_SERVICE,
            id: PartialSessionId::TransportService { session_id },
        };
        let segments: Vec<&Segment> = self
            .partials
            .frames(&key)?
            .iter()
            .filter_map(|frame| match frame {
                CommandClass::TransportService(cc) => cc.segment(),
                _ => None,
            })
            .collect();
        let datagram_size = segments.first()?.datagram_size;
        segment_request(session_id, datagram_size, &segments)
    }
}

fn store_nonce_report(cc: &CommandClass, ctx: &mut ParsingContext<'_>) {
    let CommandClass::Security(SecurityCc::NonceReport { nonce }) = cc else {
        return;
    };
    let source = ctx.source_node_id;
    match ctx.security_manager() {
        Ok(manager) => manager.store_peer_nonce(source, *nonce),
        Err(_) => warn!(source, "nonce report received without S0 configured"),
    }
}
