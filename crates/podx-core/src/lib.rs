//! podx Core Library
//!
//! This crate provides the core types, wire layouts, and identity
//! cryptography for the podx proof-of-delivery exchange protocol.
//!
//! # Modules
//!
//! - [`types`]: Protocol enumerations and records (Mode, MsgType, NodeState, Session, Address)
//! - [`wire`]: Fixed little-endian layouts for headers and typed payloads
//! - [`crypto`]: secp256k1 identity keys, Keccak-256 hashing, recoverable signatures
//! - [`error`]: Error taxonomy shared by every layer

pub mod crypto;
pub mod error;
pub mod types;
pub mod wire;

#[cfg(test)]
mod test_vectors;

pub use error::{Error, Result};
pub use types::*;
