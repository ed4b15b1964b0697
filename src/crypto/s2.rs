//! Security 2 key derivation and random number generation.
//!
//! Implements the CKDF based key expansion, the mixed entropy input used to
//! seed the SPAN generator, an AES-128 CTR_DRBG (NIST SP 800-90A, no
//! derivation function) and the X25519 shared secret used during key
//! exchange.

use aes::Aes128;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::core::CryptoError;

use super::keys::random_bytes;
use super::modes::{Block, compute_cmac};

/// Curve25519 key size.
pub const S2_PUBLIC_KEY_SIZE: usize = 32;

/// Size of an S2 entropy input (sender or receiver EI).
pub const S2_ENTROPY_INPUT_SIZE: usize = 16;

/// Size of the nonce fed into AES-CCM.
pub const S2_CCM_NONCE_SIZE: usize = 13;

/// Size of the CTR_DRBG seed (key length + block length).
const DRBG_SEED_SIZE: usize = 32;

const CONSTANT_PRK: Block = [0x33; 16];
const CONSTANT_NONCE: Block = [0x26; 16];
const CONSTANT_TE: [u8; 15] = [0x88; 15];
const CONSTANT_NK: [u8; 15] = [0x55; 15];
const CONSTANT_EI: [u8; 15] = [0x88; 15];

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.iter().flat_map(|p| p.iter().copied()).collect()
}

fn join_blocks(a: &Block, b: &Block) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(a);
    out[16..].copy_from_slice(b);
    out
}

/// Keys derived from a permanent network key.
#[derive(Clone)]
pub struct S2NetworkKeys {
    /// Key for AES-CCM encapsulation.
    pub key_ccm: Block,
    /// Key for the multicast PAN generator.
    pub key_mpan: Block,
    /// Personalization string for the SPAN CTR_DRBG.
    pub personalization_string: [u8; 32],
}

impl Drop for S2NetworkKeys {
    fn drop(&mut self) {
        self.key_ccm.zeroize();
        self.key_mpan.zeroize();
        self.personalization_string.zeroize();
    }
}

impl std::fmt::Debug for S2NetworkKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("S2NetworkKeys(..)")
    }
}

/// Temporary keys used while bootstrapping a node.
#[derive(Clone)]
pub struct S2TempKeys {
    /// Temporary AES-CCM key.
    pub temp_key_ccm: Block,
    /// Temporary personalization string.
    pub temp_personalization_string: [u8; 32],
}

impl Drop for S2TempKeys {
    fn drop(&mut self) {
        self.temp_key_ccm.zeroize();
        self.temp_personalization_string.zeroize();
    }
}

impl std::fmt::Debug for S2TempKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("S2TempKeys(..)")
    }
}

/// Compute the pseudo random key from the ECDH shared secret and both public keys.
pub fn compute_prk(
    shared_secret: &[u8],
    public_key_a: &[u8],
    public_key_b: &[u8],
) -> Result<Block, CryptoError> {
    compute_cmac(
        &concat(&[shared_secret, public_key_a, public_key_b]),
        &CONSTANT_PRK,
    )
}

/// Derive the temporary keys from the PRK.
pub fn derive_temp_keys(prk: &Block) -> Result<S2TempKeys, CryptoError> {
    let t1 = compute_cmac(&concat(&[&CONSTANT_TE, &[0x01]]), prk)?;
    let t2 = compute_cmac(&concat(&[&t1, &CONSTANT_TE, &[0x02]]), prk)?;
    let t3 = compute_cmac(&concat(&[&t2, &CONSTANT_TE, &[0x03]]), prk)?;
    Ok(S2TempKeys {
        temp_key_ccm: t1,
        temp_personalization_string: join_blocks(&t2, &t3),
    })
}

/// Derive the CCM key, MPAN key and personalization string from a network key.
pub fn derive_network_keys(network_key: &[u8]) -> Result<S2NetworkKeys, CryptoError> {
    let t1 = compute_cmac(&concat(&[&CONSTANT_NK, &[0x01]]), network_key)?;
    let t2 = compute_cmac(&concat(&[&t1, &CONSTANT_NK, &[0x02]]), network_key)?;
    let t3 = compute_cmac(&concat(&[&t2, &CONSTANT_NK, &[0x03]]), network_key)?;
    let t4 = compute_cmac(&concat(&[&t3, &CONSTANT_NK, &[0x04]]), network_key)?;
    Ok(S2NetworkKeys {
        key_ccm: t1,
        key_mpan: t4,
        personalization_string: join_blocks(&t2, &t3),
    })
}

/// Compute the nonce PRK from both entropy inputs.
pub fn compute_nonce_prk(sender_ei: &[u8], receiver_ei: &[u8]) -> Result<Block, CryptoError> {
    compute_cmac(&concat(&[sender_ei, receiver_ei]), &CONSTANT_NONCE)
}

/// Derive the mixed entropy input from the nonce PRK.
pub fn derive_mei(nonce_prk: &Block) -> Result<[u8; 32], CryptoError> {
    let t1 = compute_cmac(
        &concat(&[&CONSTANT_EI, &[0x00], &CONSTANT_EI, &[0x01]]),
        nonce_prk,
    )?;
    let t2 = compute_cmac(&concat(&[&t1, &CONSTANT_EI, &[0x02]]), nonce_prk)?;
    Ok(join_blocks(&t1, &t2))
}

/// An X25519 key pair for S2 key exchange.
pub struct S2KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl S2KeyPair {
    /// Generate a key pair from the OS CSPRNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut private: [u8; 32] = random_bytes()?;
        let pair = Self::from_private(private);
        private.zeroize();
        Ok(pair)
    }

    /// Create a key pair from an existing private key.
    pub fn from_private(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public key bytes.
    pub fn public_key(&self) -> [u8; S2_PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Compute the ECDH shared secret with a peer's public key.
    pub fn shared_secret(&self, peer_public: &[u8; S2_PUBLIC_KEY_SIZE]) -> Zeroizing<[u8; 32]> {
        let peer = PublicKey::from(*peer_public);
        Zeroizing::new(*self.secret.diffie_hellman(&peer).as_bytes())
    }
}

/// AES-128 CTR_DRBG without derivation function.
#[derive(Clone)]
pub struct CtrDrbg {
    key: Block,
    v: Block,
}

impl CtrDrbg {
    /// Instantiate from 32 bytes of entropy and an optional personalization string.
    pub fn new(entropy: &[u8; DRBG_SEED_SIZE], personalization: Option<&[u8; DRBG_SEED_SIZE]>) -> Self {
        let mut seed = *entropy;
        if let Some(p) = personalization {
            for (s, b) in seed.iter_mut().zip(p) {
                *s ^= b;
            }
        }

        let mut drbg = Self {
            key: [0u8; 16],
            v: [0u8; 16],
        };
        drbg.update(&seed);
        seed.zeroize();
        drbg
    }

    /// Encrypt `V + 1, V + 2, ...` and advance `V` past the last block used.
    fn keystream(&mut self, len: usize) -> Vec<u8> {
        let blocks = len.div_ceil(16);
        let v = u128::from_be_bytes(self.v);
        let start = v.wrapping_add(1).to_be_bytes();

        let mut out = vec![0u8; blocks * 16];
        let mut cipher = Ctr128BE::<Aes128>::new(&self.key.into(), &start.into());
        cipher.apply_keystream(&mut out);

        self.v = v.wrapping_add(blocks as u128).to_be_bytes();
        out.truncate(len);
        out
    }

    fn update(&mut self, provided: &[u8; DRBG_SEED_SIZE]) {
        let mut temp = self.keystream(DRBG_SEED_SIZE);
        for (t, p) in temp.iter_mut().zip(provided) {
            *t ^= p;
        }
        self.key.copy_from_slice(&temp[..16]);
        self.v.copy_from_slice(&temp[16..]);
        temp.zeroize();
    }

    /// Generate `len` pseudo random bytes.
    pub fn generate(&mut self, len: usize) -> Vec<u8> {
        let out = self.keystream(len);
        self.update(&[0u8; DRBG_SEED_SIZE]);
        out
    }
}

impl Drop for CtrDrbg {
    fn drop(&mut self) {
        self.key.zeroize();
        self.v.zeroize();
    }
}

impl std::fmt::Debug for CtrDrbg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CtrDrbg(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_keys_are_distinct() {
        let keys = derive_network_keys(&[0x01; 16]).unwrap();
        assert_ne!(keys.key_ccm, keys.key_mpan);
        assert_ne!(&keys.personalization_string[..16], &keys.key_ccm[..]);
    }

    #[test]
    fn test_network_keys_follow_ckdf_chain() {
        let pnk = [0x5Au8; 16];
        let keys = derive_network_keys(&pnk).unwrap();
        let t1 = compute_cmac(&concat(&[&CONSTANT_NK, &[0x01]]), &pnk).unwrap();
        let t2 = compute_cmac(&concat(&[&t1, &CONSTANT_NK, &[0x02]]), &pnk).unwrap();
        assert_eq!(keys.key_ccm, t1);
        assert_eq!(&keys.personalization_string[..16], &t2[..]);
    }

    #[test]
    fn test_network_keys_reject_bad_key() {
        assert!(derive_network_keys(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_mei_depends_on_both_inputs() {
        let prk_a = compute_nonce_prk(&[1u8; 16], &[2u8; 16]).unwrap();
        let prk_b = compute_nonce_prk(&[2u8; 16], &[1u8; 16]).unwrap();
        assert_ne!(prk_a, prk_b);
        assert_ne!(derive_mei(&prk_a).unwrap(), derive_mei(&prk_b).unwrap());
    }

    #[test]
    fn test_ctr_drbg_is_deterministic() {
        let entropy = [0x42u8; 32];
        let personalization = [0x24u8; 32];
        let mut a = CtrDrbg::new(&entropy, Some(&personalization));
        let mut b = CtrDrbg::new(&entropy, Some(&personalization));

        let first = a.generate(16);
        assert_eq!(first, b.generate(16));
        assert_ne!(first, a.generate(16));
    }

    #[test]
    fn test_ctr_drbg_personalization_changes_output() {
        let entropy = [0x42u8; 32];
        let mut plain = CtrDrbg::new(&entropy, None);
        let mut personalized = CtrDrbg::new(&entropy, Some(&[0x01; 32]));
        assert_ne!(plain.generate(13), personalized.generate(13));
    }

    #[test]
    fn test_key_exchange_agrees() {
        let alice = S2KeyPair::generate().unwrap();
        let bob = S2KeyPair::generate().unwrap();

        let ab = alice.shared_secret(&bob.public_key());
        let ba = bob.shared_secret(&alice.public_key());
        assert_eq!(*ab, *ba);

        let prk_a = compute_prk(&*ab, &alice.public_key(), &bob.public_key()).unwrap();
        let prk_b = compute_prk(&*ba, &alice.public_key(), &bob.public_key()).unwrap();
        assert_eq!(prk_a, prk_b);

        let temp = derive_temp_keys(&prk_a).unwrap();
        assert_ne!(temp.temp_key_ccm, [0u8; 16]);
    }

    fn hex_block(s: &str) -> Block {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    #[test]
    fn test_network_keys_known_answer() {
        let pnk: Vec<u8> = (0..16).collect();
        let keys = derive_network_keys(&pnk).unwrap();
        assert_eq!(keys.key_ccm, hex_block("27f90dd6d74697cba54eb11a0ee80617"));
        assert_eq!(keys.key_mpan, hex_block("4a46b6e046c129bc72f737e57e9b5786"));
        assert_eq!(
            keys.personalization_string.to_vec(),
            hex::decode("aa3b035d8f802f368d6482f4299a2b1255eed934805c397bb72c47c61ff7acfa")
                .unwrap()
        );
    }

    #[test]
    fn test_temp_keys_known_answer() {
        let prk = compute_prk(&[0x11; 32], &[0x22; 32], &[0x33; 32]).unwrap();
        assert_eq!(prk, hex_block("551c4216d002d6684adaffe747e30eaf"));

        let temp = derive_temp_keys(&prk).unwrap();
        assert_eq!(temp.temp_key_ccm, hex_block("bd4c6fc83782119408e8753740542d8f"));
        assert_eq!(
            temp.temp_personalization_string.to_vec(),
            hex::decode("04fa74f76c5cf6344fa4f6691010cf7eec08742e0bfb74e7d481c9fe6188833d")
                .unwrap()
        );
    }

    #[test]
    fn test_mei_known_answer() {
        let nonce_prk = compute_nonce_prk(&[0xA1; 16], &[0xB2; 16]).unwrap();
        assert_eq!(nonce_prk, hex_block("f0af28413ba2276672fd0a31e4e42508"));
        assert_eq!(
            derive_mei(&nonce_prk).unwrap().to_vec(),
            hex::decode("e824a02a72db6e8b29bf4108bf219a5792204f88dc965ddf950bbbc2cc29902c")
                .unwrap()
        );
    }

    #[test]
    fn test_ctr_drbg_known_answer() {
        let mut drbg = CtrDrbg::new(&[0x42; 32], Some(&[0x24; 32]));
        assert_eq!(drbg.generate(16), hex::decode("12a5f69339fa75642513ed5c03ddd0cd").unwrap());
        assert_eq!(drbg.generate(13), hex::decode("e140fbb2cd73e645cad147f776").unwrap());

        let entropy: [u8; 32] = std::array::from_fn(|i| i as u8);
        let mut drbg = CtrDrbg::new(&entropy, None);
        assert_eq!(
            drbg.generate(40),
            hex::decode(
                "1686ffcf9f358be74452e647ba156aab05135797117fd1ab317d318c660e3d1814810c15d85da566"
            )
            .unwrap()
        );
    }

    #[test]
    fn test_ctr_drbg_v_wraps() {
        let mut drbg = CtrDrbg::new(&[0u8; 32], None);
        drbg.v = [0xFF; 16];
        let out = drbg.keystream(32);
        let expected_first = crate::crypto::encrypt_aes128_ecb(&[0u8; 16], &drbg.key).unwrap();
        assert_eq!(&out[..16], &expected_first[..]);
        let mut one = [0u8; 16];
        one[15] = 1;
        assert_eq!(drbg.v, one);
    }
}
