//! Networking and protocol state machines for podx
//!
//! This crate provides:
//! - An encrypted, identity-authenticated message channel
//! - The plaintext pre-auth handshake that binds a dialed identity to a key
//! - Connections that stream arbitrarily large transfers in bounded chunks
//! - The [`Node`] with its session and transaction/negotiation state machines

pub mod channel;
pub mod connection;
pub mod crypto;
pub mod framing;
pub mod node;
pub mod preauth;
pub mod receipt;
pub mod session;
pub mod transaction;
pub mod transport;

pub use channel::SecureChannel;
pub use connection::Connection;
pub use node::Node;
pub use transaction::VerifiedReceipt;
pub use transport::{dial, Listener};
