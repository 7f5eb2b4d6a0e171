//! podxd - podx data exchange daemon
//!
//! This daemon provides:
//! - A seller that serves one response file to every authenticated buyer
//! - A buyer that runs a single exchange and stores the response
//! - Receipt generation and verification over the delivered bytes

pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use config::{Config, Offer, Purchase};
pub use error::DaemonError;
pub use server::Server;

use podx_core::{Bytes32, Session};
use sha3::{Digest, Keccak256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Outcome of a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSummary {
    pub session: Session,
    pub request_len: u64,
    pub response_len: u64,
    /// `keccak256` of the response, as signed by the buyer
    pub receipt: Bytes32,
}

/// `keccak256` of a file's contents, read in blocks.
pub async fn hash_file(path: &Path) -> std::io::Result<Bytes32> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Keccak256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Contents of an optional negotiation file; empty when not configured.
pub async fn read_nego(path: Option<&Path>) -> std::io::Result<Vec<u8>> {
    match path {
        Some(path) => tokio::fs::read(path).await,
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podx_core::crypto::keccak256;
    use std::io::Write;

    #[tokio::test]
    async fn test_hash_file_matches_keccak() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
        file.write_all(&data).unwrap();

        assert_eq!(hash_file(file.path()).await.unwrap(), keccak256(&data));
    }

    #[tokio::test]
    async fn test_missing_nego_is_empty() {
        assert!(read_nego(None).await.unwrap().is_empty());
    }
}
