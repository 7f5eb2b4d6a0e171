//! Daemon errors

use thiserror::Error;

/// Failure of one exchange, as seen by the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] podx_core::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Buyer asked for mode {requested}, serving {served}")]
    ModeMismatch {
        requested: podx_core::Mode,
        served: podx_core::Mode,
    },
    #[error("Buyer asked for root {requested}, serving {served}")]
    RootMismatch { requested: String, served: String },
    #[error("Negotiation ack does not cover our request")]
    NegoAckMismatch,
    #[error("Receipt does not match the delivered response")]
    ReceiptMismatch,
}
