//! AES-128 modes used by Z-Wave security.
//!
//! All functions are stateless. Keys and IVs are validated and a wrong
//! length is reported as [`CryptoError`] rather than panicking.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray};
use cmac::{Cmac, Mac};
use ofb::Ofb;

use crate::core::{AES_BLOCK_SIZE, CryptoError, S0_AUTH_CODE_SIZE};

/// A single AES block.
pub type Block = [u8; AES_BLOCK_SIZE];

fn key_length(key: &[u8]) -> CryptoError {
    CryptoError::InvalidKeyLength {
        expected: AES_BLOCK_SIZE,
        actual: key.len(),
    }
}

/// Build a cipher, rejecting keys that are not exactly 16 bytes.
fn cipher_for(key: &[u8]) -> Result<Aes128, CryptoError> {
    Aes128::new_from_slice(key).map_err(|_| key_length(key))
}

fn encrypt_block(cipher: &Aes128, block: &mut Block) {
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
}

/// Encrypt one block with AES-128 in ECB mode.
pub fn encrypt_aes128_ecb(plaintext: &Block, key: &[u8]) -> Result<Block, CryptoError> {
    let cipher = cipher_for(key)?;
    let mut block = *plaintext;
    encrypt_block(&cipher, &mut block);
    Ok(block)
}

/// Encrypt with AES-128 in OFB mode.
///
/// OFB is self-inverse, so [`decrypt_aes128_ofb`] is the same operation.
/// For S0 the IV is always `sender_nonce || receiver_nonce`.
pub fn encrypt_aes128_ofb(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key: &Block = key.try_into().map_err(|_| key_length(key))?;
    let iv: &Block = iv.try_into().map_err(|_| CryptoError::InvalidIvLength {
        expected: AES_BLOCK_SIZE,
        actual: iv.len(),
    })?;

    let mut output = plaintext.to_vec();
    let mut cipher = Ofb::<Aes128>::new(key.into(), iv.into());
    cipher.apply_keystream(&mut output);
    Ok(output)
}

/// Decrypt with AES-128 in OFB mode.
pub fn decrypt_aes128_ofb(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt_aes128_ofb(ciphertext, key, iv)
}

/// Compute the S0 message authentication code.
///
/// AES-128 CBC over the zero-padded `auth_data` with an all-zero IV; the
/// MAC is the first 8 bytes of the last ciphertext block. The zero padding
/// is not a standard CBC-MAC padding, hence no `cbc` mode here.
pub fn compute_mac(auth_data: &[u8], key: &[u8]) -> Result<[u8; S0_AUTH_CODE_SIZE], CryptoError> {
    let cipher = cipher_for(key)?;
    let mut state: Block = [0u8; AES_BLOCK_SIZE];

    for chunk in auth_data.chunks(AES_BLOCK_SIZE) {
        // A short final chunk is implicitly zero padded
        for (s, c) in state.iter_mut().zip(chunk) {
            *s ^= c;
        }
        encrypt_block(&cipher, &mut state);
    }
    if auth_data.is_empty() {
        encrypt_block(&cipher, &mut state);
    }

    let mut mac = [0u8; S0_AUTH_CODE_SIZE];
    mac.copy_from_slice(&state[..S0_AUTH_CODE_SIZE]);
    Ok(mac)
}

/// Compute AES-128 CMAC (RFC 4493).
pub fn compute_cmac(message: &[u8], key: &[u8]) -> Result<Block, CryptoError> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(|_| key_length(key))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Increment a big-endian counter in place, wrapping on overflow.
pub fn increment_be(counter: &mut [u8]) {
    for byte in counter.iter_mut().rev() {
        let (value, overflow) = byte.overflowing_add(1);
        *byte = value;
        if !overflow {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(hex_str: &str) -> Block {
        hex::decode(hex_str).unwrap().try_into().unwrap()
    }

    const RFC4493_KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";

    #[test]
    fn test_ecb_zero_key_vector() {
        let out = encrypt_aes128_ecb(&[0u8; 16], &[0u8; 16]).unwrap();
        assert_eq!(out, block("66e94bd4ef8a2c3b884cfa59ca342b2e"));
    }

    #[test]
    fn test_invalid_key_length() {
        assert_eq!(
            encrypt_aes128_ecb(&[0u8; 16], &[0u8; 15]),
            Err(CryptoError::InvalidKeyLength {
                expected: 16,
                actual: 15
            })
        );
        assert!(compute_mac(&[1, 2, 3], &[0u8; 17]).is_err());
        assert!(compute_cmac(&[1, 2, 3], &[]).is_err());
        assert!(encrypt_aes128_ofb(&[1, 2, 3], &[0u8; 8], &[0u8; 16]).is_err());
    }

    #[test]
    fn test_ofb_roundtrip() {
        let key = [0x42u8; 16];
        let iv = [0x07u8; 16];
        let plaintext = b"a plaintext that spans more than one AES block";

        let ciphertext = encrypt_aes128_ofb(plaintext, &key, &iv).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_ne!(&ciphertext[..], &plaintext[..]);

        let decrypted = decrypt_aes128_ofb(&ciphertext, &key, &iv).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ofb_first_block_is_encrypted_iv() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let ciphertext = encrypt_aes128_ofb(&[0u8; 16], &key, &iv).unwrap();
        assert_eq!(ciphertext, encrypt_aes128_ecb(&iv, &key).unwrap().to_vec());
    }

    #[test]
    fn test_ofb_sp800_38a_vector() {
        let key = hex::decode(RFC4493_KEY).unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        assert_eq!(
            encrypt_aes128_ofb(&plaintext, &key, &iv).unwrap(),
            hex::decode("3b3fd92eb72dad20333449f8e83cfb4a").unwrap()
        );
    }

    #[test]
    fn test_ofb_rejects_short_iv() {
        assert_eq!(
            encrypt_aes128_ofb(b"x", &[0u8; 16], &[0u8; 8]),
            Err(CryptoError::InvalidIvLength {
                expected: 16,
                actual: 8
            })
        );
    }

    #[test]
    fn test_mac_single_block_is_truncated_ecb() {
        let key = [0x11u8; 16];
        let data = [0x22u8; 16];
        let expected = encrypt_aes128_ecb(&data, &key).unwrap();
        assert_eq!(compute_mac(&data, &key).unwrap(), expected[..8]);
    }

    #[test]
    fn test_mac_zero_pads_partial_block() {
        let key = [0x11u8; 16];
        let short = [0x22u8; 5];
        let mut padded = [0u8; 16];
        padded[..5].copy_from_slice(&short);
        assert_eq!(
            compute_mac(&short, &key).unwrap(),
            compute_mac(&padded, &key).unwrap()
        );
    }

    #[test]
    fn test_cmac_rfc4493_empty() {
        let key = hex::decode(RFC4493_KEY).unwrap();
        assert_eq!(
            compute_cmac(&[], &key).unwrap(),
            block("bb1d6929e95937287fa37d129b756746")
        );
    }

    #[test]
    fn test_cmac_rfc4493_one_block() {
        let key = hex::decode(RFC4493_KEY).unwrap();
        let msg = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        assert_eq!(
            compute_cmac(&msg, &key).unwrap(),
            block("070a16b46b4d4144f79bdd9dd04a287c")
        );
    }

    #[test]
    fn test_cmac_rfc4493_partial_block() {
        let key = hex::decode(RFC4493_KEY).unwrap();
        let msg = hex::decode(
            "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e5130c81c46a35ce411",
        )
        .unwrap();
        assert_eq!(
            compute_cmac(&msg, &key).unwrap(),
            block("dfa66747de9ae63030ca32611497c827")
        );
    }

    #[test]
    fn test_increment_be_carries() {
        let mut counter = [0x00, 0xFF, 0xFF];
        increment_be(&mut counter);
        assert_eq!(counter, [0x01, 0x00, 0x00]);

        let mut counter = [0xFF, 0xFF];
        increment_be(&mut counter);
        assert_eq!(counter, [0x00, 0x00]);
    }
}
