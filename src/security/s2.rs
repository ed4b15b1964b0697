//! Security 2 session state: per-class keys, SPAN and MPAN tables.
//!
//! The singlecast PAN (SPAN) for a peer is set up in two steps. One side
//! sends its entropy input in a Nonce Report, the other mixes it with its
//! own EI and seeds a CTR_DRBG from the result. Every encrypted frame then
//! draws its 13 byte CCM nonce from that generator, so both sides must stay
//! in lock step. Multicast PANs (MPAN) are counters encrypted with the
//! class's MPAN key.
//!
//! This module keeps the state tables only; the S2 encapsulation codec
//! builds on top of it.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::core::{AES_BLOCK_SIZE, CryptoError, NodeId, SecurityError};
use crate::crypto::{
    Block, CtrDrbg, S2_CCM_NONCE_SIZE, S2_ENTROPY_INPUT_SIZE, S2NetworkKeys, S2TempKeys,
    compute_nonce_prk, derive_mei, derive_network_keys, encrypt_aes128_ecb, increment_be,
    random_bytes,
};

/// An S2 entropy input.
pub type EntropyInput = [u8; S2_ENTROPY_INPUT_SIZE];

/// The nonce fed into AES-CCM.
pub type CcmNonce = [u8; S2_CCM_NONCE_SIZE];

/// Security classes a node can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SecurityClass {
    /// S2 Unauthenticated.
    S2Unauthenticated = 0,
    /// S2 Authenticated.
    S2Authenticated = 1,
    /// S2 Access Control.
    S2AccessControl = 2,
    /// Legacy S0.
    S0Legacy = 7,
}

impl SecurityClass {
    /// Check if this is one of the S2 classes.
    pub fn is_s2(self) -> bool {
        !matches!(self, SecurityClass::S0Legacy)
    }
}

/// Which keys seed a SPAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKeys {
    /// Permanent keys of a security class.
    Class(SecurityClass),
    /// Temporary keys used during bootstrapping.
    Temporary,
}

/// SPAN state of one peer.
#[derive(Debug, Clone)]
pub enum SpanState {
    /// We sent our EI to the peer and wait for its encrypted frame.
    LocalEi {
        /// Our entropy input.
        receiver_ei: EntropyInput,
    },
    /// The peer sent us its EI.
    RemoteEi {
        /// The peer's entropy input.
        receiver_ei: EntropyInput,
    },
    /// Synchronized generator.
    Span {
        /// Keys the generator was seeded with.
        keys: SpanKeys,
        /// Nonce generator.
        rng: CtrDrbg,
        /// Last nonce handed out.
        current: Option<CcmNonce>,
    },
}

impl SpanState {
    /// Check if a generator is established.
    pub fn is_established(&self) -> bool {
        matches!(self, SpanState::Span { .. })
    }
}

/// A multicast group we send to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastGroup {
    /// Member nodes.
    pub nodes: Vec<NodeId>,
    /// Class the group is secured with.
    pub security_class: SecurityClass,
}

/// S2 key material and PAN state.
#[derive(Debug, Default)]
pub struct SecurityManager2 {
    network_keys: HashMap<SecurityClass, S2NetworkKeys>,
    temp_keys: HashMap<NodeId, S2TempKeys>,
    span: HashMap<NodeId, SpanState>,
    groups: HashMap<u8, MulticastGroup>,
    own_mpan: HashMap<u8, Block>,
    peer_mpan: HashMap<(NodeId, u8), Block>,
    next_group_id: u8,
}

impl SecurityManager2 {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permanent network key of a security class.
    pub fn set_key(&mut self, class: SecurityClass, network_key: &[u8]) -> Result<(), SecurityError> {
        if !class.is_s2() {
            return Err(SecurityError::NotInitialized(
                "S0 keys are managed by the S0 security manager".into(),
            ));
        }
        self.network_keys
            .insert(class, derive_network_keys(network_key)?);
        debug!(?class, "S2 network key set");
        Ok(())
    }

    /// Check if a key is configured for `class`.
    pub fn has_key(&self, class: SecurityClass) -> bool {
        self.network_keys.contains_key(&class)
    }

    /// Derived keys of a security class.
    pub fn keys_for_class(&self, class: SecurityClass) -> Result<&S2NetworkKeys, SecurityError> {
        self.network_keys
            .get(&class)
            .ok_or_else(|| SecurityError::NotInitialized(format!("no network key for {class:?}")))
    }

    /// Store the temporary keys used while bootstrapping `peer`.
    pub fn set_temp_keys(&mut self, peer: NodeId, keys: S2TempKeys) {
        self.temp_keys.insert(peer, keys);
    }

    /// Forget the temporary keys of `peer`.
    pub fn delete_temp_keys(&mut self, peer: NodeId) {
        self.temp_keys.remove(&peer);
    }

    // -------------------------------------------------------------------------
    // SPAN
    // -------------------------------------------------------------------------

    /// Generate our entropy input for `peer` and remember it.
    pub fn generate_nonce(&mut self, peer: NodeId) -> Result<EntropyInput, CryptoError> {
        let receiver_ei: EntropyInput = random_bytes()?;
        self.span.insert(peer, SpanState::LocalEi { receiver_ei });
        debug!(peer, "generated local EI");
        Ok(receiver_ei)
    }

    /// Remember the entropy input `peer` sent us.
    pub fn store_remote_ei(&mut self, peer: NodeId, receiver_ei: EntropyInput) {
        self.span.insert(peer, SpanState::RemoteEi { receiver_ei });
        debug!(peer, "stored remote EI");
    }

    /// Current SPAN state of `peer`, `None` if nothing was exchanged.
    pub fn span_state(&self, peer: NodeId) -> Option<&SpanState> {
        self.span.get(&peer)
    }

    /// Check if a SPAN generator is established with `peer`.
    pub fn is_span_established(&self, peer: NodeId) -> bool {
        self.span.get(&peer).is_some_and(SpanState::is_established)
    }

    /// Seed the SPAN generator for `peer` from both entropy inputs.
    pub fn initialize_span(
        &mut self,
        peer: NodeId,
        class: SecurityClass,
        sender_ei: &EntropyInput,
        receiver_ei: &EntropyInput,
    ) -> Result<(), SecurityError> {
        let personalization = self.keys_for_class(class)?.personalization_string;
        self.seed_span(peer, SpanKeys::Class(class), &personalization, sender_ei, receiver_ei)
    }

    /// Seed the SPAN generator for `peer` with its temporary keys.
    pub fn initialize_temp_span(
        &mut self,
        peer: NodeId,
        sender_ei: &EntropyInput,
        receiver_ei: &EntropyInput,
    ) -> Result<(), SecurityError> {
        let personalization = self
            .temp_keys
            .get(&peer)
            .ok_or_else(|| SecurityError::NotInitialized(format!("no temporary keys for node {peer}")))?
            .temp_personalization_string;
        self.seed_span(peer, SpanKeys::Temporary, &personalization, sender_ei, receiver_ei)
    }

    fn seed_span(
        &mut self,
        peer: NodeId,
        keys: SpanKeys,
        personalization: &[u8; 32],
        sender_ei: &EntropyInput,
        receiver_ei: &EntropyInput,
    ) -> Result<(), SecurityError> {
        let nonce_prk = compute_nonce_prk(sender_ei, receiver_ei)?;
        let mei = derive_mei(&nonce_prk)?;
        let rng = CtrDrbg::new(&mei, Some(personalization));
        self.span.insert(
            peer,
            SpanState::Span {
                keys,
                rng,
                current: None,
            },
        );
        debug!(peer, ?keys, "SPAN established");
        Ok(())
    }

    /// Draw the next CCM nonce for `peer`.
    pub fn next_nonce(&mut self, peer: NodeId) -> Result<CcmNonce, SecurityError> {
        let Some(SpanState::Span { rng, current, .. }) = self.span.get_mut(&peer) else {
            return Err(SecurityError::NoSpan { node_id: peer });
        };
        let block = rng.generate(AES_BLOCK_SIZE);
        let mut nonce = [0u8; S2_CCM_NONCE_SIZE];
        nonce.copy_from_slice(&block[..S2_CCM_NONCE_SIZE]);
        *current = Some(nonce);
        trace!(peer, "advanced SPAN");
        Ok(nonce)
    }

    /// The last nonce drawn for `peer`, if any.
    pub fn current_nonce(&self, peer: NodeId) -> Option<CcmNonce> {
        match self.span.get(&peer) {
            Some(SpanState::Span { current, .. }) => *current,
            _ => None,
        }
    }

    /// Drop the SPAN of `peer`, forcing a new nonce exchange.
    pub fn delete_nonce(&mut self, peer: NodeId) {
        if self.span.remove(&peer).is_some() {
            debug!(peer, "SPAN reset");
        }
    }

    // -------------------------------------------------------------------------
    // MPAN
    // -------------------------------------------------------------------------

    /// Create a multicast group and a fresh MPAN for it.
    pub fn create_multicast_group(
        &mut self,
        nodes: Vec<NodeId>,
        security_class: SecurityClass,
    ) -> Result<u8, SecurityError> {
        self.keys_for_class(security_class)?;
        self.next_group_id = self.next_group_id.wrapping_add(1).max(1);
        let group_id = self.next_group_id;
        let state: Block = random_bytes()?;
        self.own_mpan.insert(group_id, state);
        self.groups.insert(
            group_id,
            MulticastGroup {
                nodes,
                security_class,
            },
        );
        debug!(group_id, ?security_class, "created multicast group");
        Ok(group_id)
    }

    /// Look up a multicast group.
    pub fn multicast_group(&self, group_id: u8) -> Option<&MulticastGroup> {
        self.groups.get(&group_id)
    }

    /// Inner MPAN state of one of our groups.
    pub fn inner_mpan_state(&self, group_id: u8) -> Option<&Block> {
        self.own_mpan.get(&group_id)
    }

    /// Compute the MPAN for the next multicast frame and advance the state.
    pub fn next_mpan(&mut self, group_id: u8) -> Result<Block, SecurityError> {
        let class = self
            .groups
            .get(&group_id)
            .map(|g| g.security_class)
            .ok_or(SecurityError::NoMpan { group_id })?;
        let key_mpan = self.keys_for_class(class)?.key_mpan;
        let state = self
            .own_mpan
            .get_mut(&group_id)
            .ok_or(SecurityError::NoMpan { group_id })?;

        let mpan = encrypt_aes128_ecb(state, &key_mpan)?;
        increment_be(state);
        trace!(group_id, "advanced MPAN");
        Ok(mpan)
    }

    /// Store the inner MPAN state a peer shared for one of its groups.
    pub fn store_peer_mpan(&mut self, peer: NodeId, group_id: u8, state: Block) {
        self.peer_mpan.insert((peer, group_id), state);
    }

    /// Compute the MPAN of a peer's group and advance its state.
    pub fn next_peer_mpan(
        &mut self,
        peer: NodeId,
        group_id: u8,
        class: SecurityClass,
    ) -> Result<Block, SecurityError> {
        let key_mpan = self.keys_for_class(class)?.key_mpan;
        let state = self
            .peer_mpan
            .get_mut(&(peer, group_id))
            .ok_or(SecurityError::NoMpan { group_id })?;
        let mpan = encrypt_aes128_ecb(state, &key_mpan)?;
        increment_be(state);
        Ok(mpan)
    }

    /// Forget the MPAN state a peer shared.
    pub fn delete_peer_mpan(&mut self, peer: NodeId, group_id: u8) {
        self.peer_mpan.remove(&(peer, group_id));
    }
}
