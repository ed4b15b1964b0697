//! Security layer state and the Security (S0) command class.
//!
//! - [`NonceStore`]: single-use S0 nonces with lazy expiry
//! - [`SecurityManager`]: S0 keys, nonce table and sequence counter
//! - [`SecurityCc`]: S0 commands including encrypted encapsulation
//! - [`SecurityManager2`]: S2 keys and SPAN/MPAN tables (feature `s2`)

mod manager;
mod nonce;
mod s0;
#[cfg(feature = "s2")]
mod s2;

pub use manager::*;
pub use nonce::*;
pub use s0::*;
#[cfg(feature = "s2")]
pub use s2::*;
