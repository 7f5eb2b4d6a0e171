//! Configuration for podxd

use anyhow::Context;
use clap::Parser;
use podx_core::crypto::KeyPair;
use podx_core::{Address, Bytes32, Identity, Mode, Role};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// podxd - podx data exchange daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "podxd")]
#[command(about = "Buyer/seller daemon for the podx data exchange protocol")]
pub struct Config {
    /// Side of the exchange to play (buyer or seller)
    #[arg(long, env = "PODX_ROLE")]
    pub role: Role,

    /// Listen address for inbound buyers (seller)
    #[arg(short, long, env = "PODX_LISTEN", default_value = "0.0.0.0:30400")]
    pub listen: SocketAddr,

    /// Seller endpoint to dial, `host:port` (buyer)
    #[arg(long, env = "PODX_PEER")]
    pub peer: Option<String>,

    /// Identity the seller must prove, 20 bytes hex (buyer)
    #[arg(long, env = "PODX_PEER_ID")]
    pub peer_id: Option<Identity>,

    /// Secret key as 32 bytes hex; a fresh key is generated when absent
    #[arg(long, env = "PODX_KEY_SEED", value_parser = parse_bytes32)]
    pub key_seed: Option<Bytes32>,

    /// Exchange mode
    #[arg(long, env = "PODX_MODE", default_value = "plain-complaint")]
    pub mode: Mode,

    /// Merkle root of the dataset, 32 bytes hex
    #[arg(long, env = "PODX_ROOT", value_parser = parse_bytes32)]
    pub root: Bytes32,

    /// File streamed as the transaction request (buyer)
    #[arg(long)]
    pub request: Option<PathBuf>,

    /// File streamed as the transaction response (seller)
    #[arg(long)]
    pub response: Option<PathBuf>,

    /// Where the received response is written (buyer)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Opaque negotiation request for OT modes
    #[arg(long)]
    pub nego: Option<PathBuf>,

    /// Per-call deadline during the pre-auth handshake
    #[arg(long, env = "PODX_PREAUTH_TIMEOUT_SECS", default_value = "10")]
    pub preauth_timeout_secs: u64,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

/// What a seller serves to every buyer
#[derive(Debug, Clone)]
pub struct Offer {
    pub listen: SocketAddr,
    pub mode: Mode,
    pub root: Bytes32,
    pub response: PathBuf,
    pub nego: Option<PathBuf>,
    pub preauth_timeout: Duration,
}

/// One exchange a buyer runs against a seller
#[derive(Debug, Clone)]
pub struct Purchase {
    pub peer: Address,
    pub mode: Mode,
    pub root: Bytes32,
    pub request: PathBuf,
    pub output: PathBuf,
    pub nego: Option<PathBuf>,
    pub preauth_timeout: Duration,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format '{}'", self.log_format);
        }
        if self.preauth_timeout_secs == 0 {
            anyhow::bail!("Pre-auth timeout must be at least one second");
        }
        if self.nego.is_some() && !self.mode.requires_ot() {
            anyhow::bail!("Mode {} does not negotiate; drop --nego", self.mode);
        }
        match self.role {
            Role::Seller => self.offer().map(drop),
            Role::Buyer => self.purchase().map(drop),
        }
    }

    /// Load the configured key or generate a fresh one.
    pub fn keypair(&self) -> anyhow::Result<KeyPair> {
        match &self.key_seed {
            Some(seed) => KeyPair::from_seed(seed).context("Invalid --key-seed"),
            None => Ok(KeyPair::generate()),
        }
    }

    pub fn preauth_timeout(&self) -> Duration {
        Duration::from_secs(self.preauth_timeout_secs)
    }

    /// Seller settings; fails if a seller-only option is missing.
    pub fn offer(&self) -> anyhow::Result<Offer> {
        let response = self
            .response
            .clone()
            .context("Seller requires --response")?;
        Ok(Offer {
            listen: self.listen,
            mode: self.mode,
            root: self.root,
            response,
            nego: self.nego.clone(),
            preauth_timeout: self.preauth_timeout(),
        })
    }

    /// Buyer settings; fails if a buyer-only option is missing.
    pub fn purchase(&self) -> anyhow::Result<Purchase> {
        let endpoint = self.peer.clone().context("Buyer requires --peer")?;
        let identity = self.peer_id.context("Buyer requires --peer-id")?;
        let request = self.request.clone().context("Buyer requires --request")?;
        let output = self.output.clone().context("Buyer requires --output")?;
        Ok(Purchase {
            peer: Address::new(endpoint, identity),
            mode: self.mode,
            root: self.root,
            request,
            output,
            nego: self.nego.clone(),
            preauth_timeout: self.preauth_timeout(),
        })
    }
}

fn parse_bytes32(s: &str) -> Result<Bytes32, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}
