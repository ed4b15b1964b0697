//! Security primitives for S0 and S2.
//!
//! Implements the cryptographic building blocks without any protocol state:
//! - AES-128 ECB/OFB, CBC-MAC (S0) and CMAC (S2)
//! - S0 key derivation (authentication and encryption keys)
//! - S2 key derivation (CKDF), mixed entropy input and CTR_DRBG
//! - CSPRNG access that never falls back to a weak source

mod keys;
mod modes;
#[cfg(feature = "s2")]
mod s2;

pub use keys::*;
pub use modes::*;
#[cfg(feature = "s2")]
pub use s2::*;
