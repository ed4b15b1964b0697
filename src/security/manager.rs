//! S0 security manager: network keys, nonce table and sequence counter.
//!
//! One manager exists per controller. It is threaded through parsing and
//! encoding as `&mut SecurityManager`, so a nonce lookup and its deletion
//! always happen under the same exclusive borrow.

use std::time::Instant;

use tracing::debug;

use crate::config::SecurityOptions;
use crate::core::{CryptoError, NodeId, S0_SEQUENCE_COUNTER_MASK};
use crate::crypto::{NetworkKey, S0Keys};

use super::nonce::{NonceBytes, NonceKey, NonceStore};

/// Keys and nonce state for Security (S0).
#[derive(Debug)]
pub struct SecurityManager {
    own_node_id: NodeId,
    keys: S0Keys,
    nonces: NonceStore,
    sequence_counter: u8,
}

impl SecurityManager {
    /// Create a manager for the given node and network key.
    pub fn new(
        own_node_id: NodeId,
        network_key: NetworkKey,
        options: &SecurityOptions,
    ) -> Result<Self, CryptoError> {
        let keys = S0Keys::derive(network_key)?;
        let mut nonces = NonceStore::new(own_node_id, options.nonce_timeout);
        nonces.set_max_free_per_peer(options.max_free_nonces_per_peer);
        Ok(Self {
            own_node_id,
            keys,
            nonces,
            sequence_counter: 0,
        })
    }

    /// Node id of the controller.
    pub fn own_node_id(&self) -> NodeId {
        self.own_node_id
    }

    /// Derived S0 keys.
    pub fn keys(&self) -> &S0Keys {
        &self.keys
    }

    /// Replace the network key.
    ///
    /// Every stored nonce is dropped since none of them can be used with
    /// the new keys.
    pub fn set_network_key(&mut self, network_key: NetworkKey) -> Result<(), CryptoError> {
        self.keys = S0Keys::derive(network_key)?;
        let purged = self.nonces.len();
        self.nonces.clear();
        debug!(purged, "network key replaced");
        Ok(())
    }

    /// The nonce table.
    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }

    /// Mutable access to the nonce table.
    pub fn nonces_mut(&mut self) -> &mut NonceStore {
        &mut self.nonces
    }

    /// Answer a Nonce Get from `receiver`: generate and register a nonce.
    pub fn generate_nonce(&mut self, receiver: NodeId) -> Result<NonceBytes, CryptoError> {
        self.nonces.generate_nonce(receiver)
    }

    /// Store a nonce received from `issuer` in a Nonce Report.
    pub fn store_peer_nonce(&mut self, issuer: NodeId, nonce: NonceBytes) {
        self.nonces.set_nonce(
            NonceKey::new(issuer, nonce[0]),
            nonce,
            self.own_node_id,
            true,
        );
    }

    /// Take a nonce issued by `peer` for encrypting a command to it.
    pub fn take_free_nonce(&mut self, peer: NodeId) -> Option<NonceBytes> {
        self.nonces.get_free_nonce(peer)
    }

    /// Take one of our own nonces referenced by a received frame.
    pub fn take_own_nonce(&mut self, nonce_id: u8) -> Option<NonceBytes> {
        self.take_own_nonce_at(nonce_id, Instant::now())
    }

    /// Take one of our own nonces that is live at `now`.
    pub fn take_own_nonce_at(&mut self, nonce_id: u8, now: Instant) -> Option<NonceBytes> {
        self.nonces
            .take_nonce_at(NonceKey::new(self.own_node_id, nonce_id), now)
    }

    /// Check if a peer nonce is available for `peer`.
    pub fn has_free_nonce(&self, peer: NodeId) -> bool {
        let now = Instant::now();
        (0..=u8::MAX).any(|id| self.nonces.has_nonce_at(NonceKey::new(peer, id), now))
    }

    /// Next 4 bit sequence counter for a two-frame encapsulation.
    pub fn next_sequence_counter(&mut self) -> u8 {
        self.sequence_counter = (self.sequence_counter + 1) & S0_SEQUENCE_COUNTER_MASK;
        self.sequence_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SecurityManager {
        SecurityManager::new(1, NetworkKey::from_bytes([0u8; 16]), &SecurityOptions::default())
            .unwrap()
    }

    #[test]
    fn test_generated_nonce_is_taken_once() {
        let mut mgr = manager();
        let nonce = mgr.generate_nonce(5).unwrap();
        assert_eq!(mgr.take_own_nonce(nonce[0]), Some(nonce));
        assert_eq!(mgr.take_own_nonce(nonce[0]), None);
    }

    #[test]
    fn test_peer_nonce_round_trip() {
        let mut mgr = manager();
        assert!(!mgr.has_free_nonce(5));
        mgr.store_peer_nonce(5, [0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]);
        assert!(mgr.has_free_nonce(5));
        assert_eq!(mgr.take_free_nonce(5).map(|n| n[0]), Some(0x11));
        assert_eq!(mgr.take_free_nonce(5), None);
    }

    #[test]
    fn test_sequence_counter_wraps() {
        let mut mgr = manager();
        let counters: Vec<u8> = (0..17).map(|_| mgr.next_sequence_counter()).collect();
        assert_eq!(counters[0], 1);
        assert_eq!(counters[14], 15);
        assert_eq!(counters[15], 0);
        assert!(counters.iter().all(|c| *c <= 0x0F));
    }

    #[test]
    fn test_key_change_drops_nonces() {
        let mut mgr = manager();
        mgr.store_peer_nonce(5, [0x22; 8]);
        mgr.set_network_key(NetworkKey::from_bytes([1u8; 16])).unwrap();
        assert!(mgr.nonces().is_empty());
        assert_ne!(mgr.keys().auth_key(), &[0u8; 16]);
    }
}
