//! Network key handling and S0 key derivation.
//!
//! Key material is zeroized on drop.

use rand::{RngCore, rngs::OsRng};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::core::{CryptoError, NETWORK_KEY_SIZE};

use super::modes::{Block, encrypt_aes128_ecb};

/// Plaintext encrypted with the network key to derive the S0 auth key.
const S0_AUTH_KEY_SEED: Block = [0x55; 16];

/// Plaintext encrypted with the network key to derive the S0 encryption key.
const S0_ENCRYPTION_KEY_SEED: Block = [0xAA; 16];

/// Fill `buf` from the operating system CSPRNG.
///
/// There is no fallback: if the entropy source fails the error is returned.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|_| CryptoError::EntropyUnavailable)
}

/// Generate `N` random bytes.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut buf = [0u8; N];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// A 16 byte network key.
#[derive(Clone)]
pub struct NetworkKey {
    key: [u8; NETWORK_KEY_SIZE],
}

impl NetworkKey {
    /// Create a key from bytes.
    pub fn from_bytes(key: [u8; NETWORK_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Create a key from a slice, rejecting anything but 16 bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self, CryptoError> {
        let key = key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: NETWORK_KEY_SIZE,
            actual: key.len(),
        })?;
        Ok(Self { key })
    }

    /// Generate a new random key.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            key: random_bytes()?,
        })
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; NETWORK_KEY_SIZE] {
        &self.key
    }
}

impl Drop for NetworkKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl PartialEq for NetworkKey {
    fn eq(&self, other: &Self) -> bool {
        self.key[..].ct_eq(&other.key[..]).into()
    }
}

impl Eq for NetworkKey {}

impl std::fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NetworkKey(..)")
    }
}

/// Derive the S0 authentication key from a network key.
pub fn generate_auth_key(network_key: &[u8]) -> Result<Block, CryptoError> {
    encrypt_aes128_ecb(&S0_AUTH_KEY_SEED, network_key)
}

/// Derive the S0 encryption key from a network key.
pub fn generate_encryption_key(network_key: &[u8]) -> Result<Block, CryptoError> {
    encrypt_aes128_ecb(&S0_ENCRYPTION_KEY_SEED, network_key)
}

/// The key set used by S0: network key plus its derived keys.
#[derive(Clone)]
pub struct S0Keys {
    network_key: NetworkKey,
    auth_key: Block,
    encryption_key: Block,
}

impl S0Keys {
    /// Derive the auth and encryption keys from a network key.
    pub fn derive(network_key: NetworkKey) -> Result<Self, CryptoError> {
        let auth_key = generate_auth_key(network_key.as_bytes())?;
        let encryption_key = generate_encryption_key(network_key.as_bytes())?;
        Ok(Self {
            network_key,
            auth_key,
            encryption_key,
        })
    }

    /// The network key.
    pub fn network_key(&self) -> &NetworkKey {
        &self.network_key
    }

    /// Key used for the CBC-MAC.
    pub fn auth_key(&self) -> &Block {
        &self.auth_key
    }

    /// Key used for OFB encryption.
    pub fn encryption_key(&self) -> &Block {
        &self.encryption_key
    }
}

impl Drop for S0Keys {
    fn drop(&mut self) {
        self.auth_key.zeroize();
        self.encryption_key.zeroize();
    }
}

impl std::fmt::Debug for S0Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("S0Keys(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; 16] = random_bytes().unwrap();
        let b: [u8; 16] = random_bytes().unwrap();
        // Different with overwhelming probability
        assert_ne!(a, b);
    }

    #[test]
    fn test_network_key_from_slice() {
        assert!(NetworkKey::from_slice(&[0u8; 16]).is_ok());
        assert_eq!(
            NetworkKey::from_slice(&[0u8; 12]).unwrap_err(),
            CryptoError::InvalidKeyLength {
                expected: 16,
                actual: 12
            }
        );
    }

    #[test]
    fn test_zero_network_key_known_answer() {
        let keys = S0Keys::derive(NetworkKey::from_bytes([0u8; 16])).unwrap();
        assert_eq!(
            keys.auth_key().to_vec(),
            hex::decode("9adae054f63dfaff5ea18e45edf6ea6f").unwrap()
        );
        assert_eq!(
            keys.encryption_key().to_vec(),
            hex::decode("8522717d3ad1fbfeafa1ceaafdf56565").unwrap()
        );
    }

    #[test]
    fn test_network_key_equality() {
        let mut other = [0x11u8; 16];
        assert_eq!(NetworkKey::from_bytes(other), NetworkKey::from_bytes([0x11; 16]));
        other[15] ^= 0x80;
        assert_ne!(NetworkKey::from_bytes(other), NetworkKey::from_bytes([0x11; 16]));
    }

    #[test]
    fn test_s0_keys_differ() {
        let keys = S0Keys::derive(NetworkKey::from_bytes([0u8; 16])).unwrap();
        assert_ne!(keys.auth_key(), keys.encryption_key());
        assert_eq!(keys.network_key().as_bytes(), &[0u8; 16]);
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = NetworkKey::from_bytes([0xAB; 16]);
        assert_eq!(format!("{key:?}"), "NetworkKey(..)");
    }
}
