//! Core constants, error taxonomy and traits.
//!
//! This module has no protocol state. Everything else builds on it.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::*;
pub use traits::*;
