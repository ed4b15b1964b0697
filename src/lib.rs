//! # zwave-core
//!
//! Host-side protocol core of a Z-Wave driver stack.
//!
//! The crate covers the parts of the protocol that sit between raw command
//! class bytes and the individual command class implementations:
//!
//! - **Security (S0)**: AES-128 OFB encryption with CBC-MAC authentication
//!   and a single-use nonce table
//! - **Security (S2) state**: CKDF key derivation, SPAN and MPAN tables
//! - **Transport Service**: segmentation and reassembly of datagrams that
//!   do not fit into one radio frame
//! - **Partial sessions**: merging of multi-frame exchanges into one
//!   logical command
//!
//! ## Feature Flags
//!
//! - `s2` (default): S2 key material, SPAN/MPAN state and ECDH
//! - `async` (default): paced Transport Service sending on tokio timers
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types and core traits
//! - [`codec`]: Command class headers and CRC-16
//! - [`crypto`]: AES primitives, S0 key derivation and the S2 KDF
//! - [`security`]: S0 codec, nonce store and S2 state
//! - [`transport_service`]: Transport Service codec, segmenter and sender
//! - [`partial`]: Partial command class sessions
//! - [`cc`]: Command class model and parser registry
//! - [`dispatch`]: Receive pipeline
//!
//! ## Example Usage
//!
//! ```rust
//! use zwave_core::prelude::*;
//!
//! let mut dispatcher = Dispatcher::new(DriverOptions::new(1));
//! let cc = dispatcher.handle_frame(5, &[0x20, 0x03, 0xFF], None)?;
//! assert_eq!(
//!     cc,
//!     Some(CommandClass::Basic(BasicCc::Report { current_value: 0xFF }))
//! );
//! # Ok::<(), zwave_core::core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cc;
pub mod codec;
pub mod config;
pub mod core;
pub mod crypto;
pub mod dispatch;
pub mod partial;
pub mod security;
pub mod transport_service;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cc::{
        BasicCc, CcRegistry, CommandClass, EncodingContext, ParsingContext, RawCc,
    };
    pub use crate::config::{
        DriverOptions, SecurityOptions, TransportServiceOptions, TransportServiceVersion,
    };
    pub use crate::core::*;
    pub use crate::crypto::NetworkKey;
    pub use crate::dispatch::Dispatcher;
    pub use crate::partial::{PartialSessionKey, PartialSessionManager};
    pub use crate::security::{Encapsulation, SecurityCc, SecurityManager};
    pub use crate::transport_service::{
        SegmentSender, SessionIdAllocator, TransportServiceCc, segment_datagram,
    };
}

pub use crate::core::{Error, ErrorCode, Result};
