//! Per-peer nonce table for S0.
//!
//! Nonces are keyed by `(issuer, nonce_id)` where the nonce id is the first
//! byte of the nonce. A nonce is single-use: decoding removes it in the same
//! call that reads it, and the free nonces handed out for encoding are
//! removed when taken.
//!
//! Expiry is lazy. Every accessor has an `*_at` variant taking the current
//! time so the store can be driven deterministically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::core::{CryptoError, NodeId, S0_HALF_NONCE_SIZE};
use crate::crypto::random_bytes;

/// Raw S0 nonce bytes.
pub type NonceBytes = [u8; S0_HALF_NONCE_SIZE];

/// Number of distinct nonce ids.
const NONCE_ID_SPACE: usize = 256;

/// Key of a nonce in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonceKey {
    /// Node that generated the nonce.
    pub issuer: NodeId,
    /// First byte of the nonce.
    pub nonce_id: u8,
}

impl NonceKey {
    /// Create a key.
    pub fn new(issuer: NodeId, nonce_id: u8) -> Self {
        Self { issuer, nonce_id }
    }
}

/// A stored nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce {
    /// Nonce bytes.
    pub value: NonceBytes,
    /// Node that generated the nonce.
    pub issuer: NodeId,
    /// Node that may use the nonce.
    pub receiver: NodeId,
    /// Peer-issued nonce that is available for encrypting.
    pub free_for_reuse: bool,
    /// Time the nonce was stored.
    pub created_at: Instant,
}

impl Nonce {
    /// The nonce id (first byte).
    pub fn nonce_id(&self) -> u8 {
        self.value[0]
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= timeout
    }
}

/// Table of issued and received nonces.
#[derive(Debug)]
pub struct NonceStore {
    own_node_id: NodeId,
    timeout: Duration,
    max_free_per_peer: usize,
    nonces: HashMap<NonceKey, Nonce>,
}

impl NonceStore {
    /// Create a store for the given node.
    pub fn new(own_node_id: NodeId, timeout: Duration) -> Self {
        Self {
            own_node_id,
            timeout,
            max_free_per_peer: 1,
            nonces: HashMap::new(),
        }
    }

    /// Limit the number of peer-issued nonces retained per node.
    pub fn set_max_free_per_peer(&mut self, max: usize) {
        self.max_free_per_peer = max.max(1);
    }

    /// Node id of the local node.
    pub fn own_node_id(&self) -> NodeId {
        self.own_node_id
    }

    /// Nonce lifetime.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of stored nonces, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    /// Drop every nonce.
    pub fn clear(&mut self) {
        self.nonces.clear();
    }

    /// Generate and register a fresh nonce for `receiver`.
    pub fn generate_nonce(&mut self, receiver: NodeId) -> Result<NonceBytes, CryptoError> {
        self.generate_nonce_at(receiver, Instant::now())
    }

    /// Generate and register a fresh nonce for `receiver` at time `now`.
    ///
    /// Draws until the nonce id is not in use by another live nonce of ours.
    pub fn generate_nonce_at(
        &mut self,
        receiver: NodeId,
        now: Instant,
    ) -> Result<NonceBytes, CryptoError> {
        self.purge_expired(now);
        if self.count_issued_by(self.own_node_id) >= NONCE_ID_SPACE {
            self.evict_oldest(self.own_node_id);
        }

        let nonce = loop {
            let candidate: NonceBytes = random_bytes()?;
            if !self.has_nonce_at(NonceKey::new(self.own_node_id, candidate[0]), now) {
                break candidate;
            }
        };

        self.insert(NonceKey::new(self.own_node_id, nonce[0]), nonce, receiver, false, now);
        debug!(receiver, nonce_id = nonce[0], "generated nonce");
        Ok(nonce)
    }

    /// Store a nonce, replacing any nonce with the same key.
    pub fn set_nonce(&mut self, key: NonceKey, value: NonceBytes, receiver: NodeId, free: bool) {
        self.set_nonce_at(key, value, receiver, free, Instant::now());
    }

    /// Store a nonce at time `now`.
    ///
    /// Free nonces are the ones a peer sent us in a Nonce Report; only the
    /// newest `max_free_per_peer` of them are kept.
    pub fn set_nonce_at(
        &mut self,
        key: NonceKey,
        value: NonceBytes,
        receiver: NodeId,
        free: bool,
        now: Instant,
    ) {
        if free {
            while self.count_free_from(key.issuer) >= self.max_free_per_peer {
                if !self.evict_oldest_free(key.issuer) {
                    break;
                }
            }
        }
        self.insert(key, value, receiver, free, now);
        trace!(issuer = key.issuer, nonce_id = key.nonce_id, free, "stored nonce");
    }

    fn insert(&mut self, key: NonceKey, value: NonceBytes, receiver: NodeId, free: bool, now: Instant) {
        self.nonces.insert(
            key,
            Nonce {
                value,
                issuer: key.issuer,
                receiver,
                free_for_reuse: free,
                created_at: now,
            },
        );
    }

    /// Look up a live nonce without consuming it.
    pub fn get_nonce(&self, key: NonceKey) -> Option<NonceBytes> {
        self.get_nonce_at(key, Instant::now())
    }

    /// Look up a nonce that is live at `now` without consuming it.
    pub fn get_nonce_at(&self, key: NonceKey, now: Instant) -> Option<NonceBytes> {
        self.nonces
            .get(&key)
            .filter(|n| !n.is_expired(now, self.timeout))
            .map(|n| n.value)
    }

    /// Check if a live nonce exists for `key`.
    pub fn has_nonce(&self, key: NonceKey) -> bool {
        self.has_nonce_at(key, Instant::now())
    }

    /// Check if a nonce is live at `now`.
    pub fn has_nonce_at(&self, key: NonceKey, now: Instant) -> bool {
        self.get_nonce_at(key, now).is_some()
    }

    /// Remove a nonce. Removing a missing nonce is a no-op.
    pub fn delete_nonce(&mut self, key: NonceKey) {
        if self.nonces.remove(&key).is_some() {
            trace!(issuer = key.issuer, nonce_id = key.nonce_id, "deleted nonce");
        }
    }

    /// Read and remove a nonce in one step.
    ///
    /// An expired nonce is removed as well but not returned.
    pub fn take_nonce_at(&mut self, key: NonceKey, now: Instant) -> Option<NonceBytes> {
        let nonce = self.nonces.remove(&key)?;
        if nonce.is_expired(now, self.timeout) {
            debug!(issuer = key.issuer, nonce_id = key.nonce_id, "nonce expired");
            return None;
        }
        Some(nonce.value)
    }

    /// Read and remove a nonce in one step.
    pub fn take_nonce(&mut self, key: NonceKey) -> Option<NonceBytes> {
        self.take_nonce_at(key, Instant::now())
    }

    /// Take a live nonce issued by `issuer` for encrypting a command to it.
    pub fn get_free_nonce(&mut self, issuer: NodeId) -> Option<NonceBytes> {
        self.get_free_nonce_at(issuer, Instant::now())
    }

    /// Take a nonce issued by `issuer` that is live at `now`.
    ///
    /// The newest free nonce is used; it is removed from the store since
    /// a nonce must never encrypt more than one frame.
    pub fn get_free_nonce_at(&mut self, issuer: NodeId, now: Instant) -> Option<NonceBytes> {
        self.purge_expired(now);
        let key = self
            .nonces
            .iter()
            .filter(|(k, n)| k.issuer == issuer && n.free_for_reuse)
            .max_by_key(|(_, n)| n.created_at)
            .map(|(k, _)| *k)?;
        self.nonces.remove(&key).map(|n| n.value)
    }

    /// Remove every nonce we issued for `receiver`.
    pub fn delete_all_nonces_for_receiver(&mut self, receiver: NodeId) {
        let own = self.own_node_id;
        self.nonces
            .retain(|k, n| !(k.issuer == own && n.receiver == receiver));
    }

    /// Drop every nonce that is expired at `now`, returning how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.nonces.len();
        let timeout = self.timeout;
        self.nonces.retain(|_, n| !n.is_expired(now, timeout));
        let purged = before - self.nonces.len();
        if purged > 0 {
            trace!(purged, "purged expired nonces");
        }
        purged
    }

    fn count_issued_by(&self, issuer: NodeId) -> usize {
        self.nonces.keys().filter(|k| k.issuer == issuer).count()
    }

    fn count_free_from(&self, issuer: NodeId) -> usize {
        self.nonces
            .iter()
            .filter(|(k, n)| k.issuer == issuer && n.free_for_reuse)
            .count()
    }

    fn evict_oldest(&mut self, issuer: NodeId) {
        let oldest = self
            .nonces
            .iter()
            .filter(|(k, _)| k.issuer == issuer)
            .min_by_key(|(_, n)| n.created_at)
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            self.nonces.remove(&key);
        }
    }

    fn evict_oldest_free(&mut self, issuer: NodeId) -> bool {
        let oldest = self
            .nonces
            .iter()
            .filter(|(k, n)| k.issuer == issuer && n.free_for_reuse)
            .min_by_key(|(_, n)| n.created_at)
            .map(|(k, _)| *k);
        match oldest {
            Some(key) => self.nonces.remove(&key).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWN: NodeId = 1;
    const PEER: NodeId = 5;
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn store() -> NonceStore {
        NonceStore::new(OWN, TIMEOUT)
    }

    #[test]
    fn test_generate_registers_nonce() {
        let mut store = store();
        let now = Instant::now();
        let nonce = store.generate_nonce_at(PEER, now).unwrap();

        let key = NonceKey::new(OWN, nonce[0]);
        assert_eq!(store.get_nonce_at(key, now), Some(nonce));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_generated_nonce_ids_are_unique() {
        let mut store = store();
        let now = Instant::now();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..64 {
            let nonce = store.generate_nonce_at(PEER, now).unwrap();
            assert!(ids.insert(nonce[0]));
        }
    }

    #[test]
    fn test_id_space_exhaustion_evicts_oldest() {
        let mut store = store();
        let start = Instant::now();
        for i in 0..NONCE_ID_SPACE {
            store
                .generate_nonce_at(PEER, start + Duration::from_micros(i as u64))
                .unwrap();
        }
        assert_eq!(store.len(), NONCE_ID_SPACE);
        store
            .generate_nonce_at(PEER, start + Duration::from_millis(1))
            .unwrap();
        assert_eq!(store.len(), NONCE_ID_SPACE);
    }

    #[test]
    fn test_get_does_not_consume() {
        let mut store = store();
        let now = Instant::now();
        let key = NonceKey::new(OWN, 0xAB);
        store.set_nonce_at(key, [0xAB; 8], PEER, false, now);

        assert!(store.get_nonce_at(key, now).is_some());
        assert!(store.get_nonce_at(key, now).is_some());
    }

    #[test]
    fn test_take_is_single_use() {
        let mut store = store();
        let now = Instant::now();
        let key = NonceKey::new(OWN, 0xAB);
        store.set_nonce_at(key, [0xAB; 8], PEER, false, now);

        assert_eq!(store.take_nonce_at(key, now), Some([0xAB; 8]));
        assert_eq!(store.take_nonce_at(key, now), None);
    }

    #[test]
    fn test_expired_nonce_is_not_returned() {
        let mut store = store();
        let now = Instant::now();
        let key = NonceKey::new(OWN, 0x01);
        store.set_nonce_at(key, [0x01; 8], PEER, false, now);

        let later = now + TIMEOUT;
        assert_eq!(store.get_nonce_at(key, later), None);
        assert_eq!(store.take_nonce_at(key, later), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = store();
        let key = NonceKey::new(OWN, 0x01);
        store.set_nonce(key, [0x01; 8], PEER, false);
        store.delete_nonce(key);
        store.delete_nonce(key);
        assert!(!store.has_nonce(key));
    }

    #[test]
    fn test_free_nonce_is_handed_out_once() {
        let mut store = store();
        let now = Instant::now();
        store.set_nonce_at(NonceKey::new(PEER, 0x11), [0x11; 8], OWN, true, now);

        assert_eq!(store.get_free_nonce_at(PEER, now), Some([0x11; 8]));
        assert_eq!(store.get_free_nonce_at(PEER, now), None);
    }

    #[test]
    fn test_free_nonce_limit_keeps_newest() {
        let mut store = store();
        let now = Instant::now();
        store.set_nonce_at(NonceKey::new(PEER, 0x11), [0x11; 8], OWN, true, now);
        store.set_nonce_at(
            NonceKey::new(PEER, 0x22),
            [0x22; 8],
            OWN,
            true,
            now + Duration::from_millis(10),
        );

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get_free_nonce_at(PEER, now + Duration::from_millis(20)),
            Some([0x22; 8])
        );
    }

    #[test]
    fn test_own_nonces_are_not_free() {
        let mut store = store();
        store.generate_nonce(PEER).unwrap();
        assert_eq!(store.get_free_nonce(OWN), None);
    }

    #[test]
    fn test_delete_all_for_receiver() {
        let mut store = store();
        let now = Instant::now();
        store.set_nonce_at(NonceKey::new(OWN, 0x01), [0x01; 8], PEER, false, now);
        store.set_nonce_at(NonceKey::new(OWN, 0x02), [0x02; 8], 7, false, now);

        store.delete_all_nonces_for_receiver(PEER);
        assert!(!store.has_nonce_at(NonceKey::new(OWN, 0x01), now));
        assert!(store.has_nonce_at(NonceKey::new(OWN, 0x02), now));
    }

    #[test]
    fn test_purge_expired() {
        let mut store = store();
        let now = Instant::now();
        store.set_nonce_at(NonceKey::new(OWN, 0x01), [0x01; 8], PEER, false, now);
        store.set_nonce_at(
            NonceKey::new(OWN, 0x02),
            [0x02; 8],
            PEER,
            false,
            now + Duration::from_secs(3),
        );

        assert_eq!(store.purge_expired(now + Duration::from_secs(6)), 1);
        assert_eq!(store.len(), 1);
    }
}
