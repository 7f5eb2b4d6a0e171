//! Error types for podx

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// podx error taxonomy
///
/// Every failure is returned to the caller as-is; nothing is retried. After
/// any error the connection must be treated as unusable.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket I/O failure or closed connection
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Bad revision, out-of-range type, or a read that disagrees with a declared length
    #[error("framing error: {0}")]
    Framing(String),

    /// Message type or length does not match what the current state expects
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Signature or identity mismatch
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Mode or commitment mismatch across the session handshake
    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    pub fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a transport error that did not originate from the OS.
    pub fn transport(kind: std::io::ErrorKind, msg: impl Into<String>) -> Self {
        Self::Transport(std::io::Error::new(kind, msg.into()))
    }
}
