//! Core protocol types for podx
//!
//! Every enumeration that reaches the wire is explicitly numbered and
//! append-only: new variants go at the end, existing values never move.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 32-byte fixed-size array used for hashes and commitments.
pub type Bytes32 = [u8; 32];

/// Network name advertised for podx endpoints.
pub const NETWORK_NAME: &str = "tcp+rlpx";

// =============================================================================
// EXCHANGE MODE
// =============================================================================

/// Exchange mode negotiated for a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u16)]
pub enum Mode {
    PlainComplaint = 0,
    PlainOtComplaint = 1,
    PlainAtomicSwap = 2,
    TableVrfQuery = 3,
    TableOtVrfQuery = 4,
    TableComplaint = 5,
    TableOtComplaint = 6,
    TableOtAtomicSwap = 7,
}

/// Static capabilities of a mode
struct ModeCaps {
    name: &'static str,
    /// Whether the oblivious-transfer negotiation runs before the Tx phase
    ot: bool,
}

/// Indexed by the mode's wire value.
const MODE_CAPS: [ModeCaps; Mode::COUNT] = [
    ModeCaps { name: "plain-complaint", ot: false },
    ModeCaps { name: "plain-ot-complaint", ot: true },
    ModeCaps { name: "plain-atomic-swap", ot: false },
    ModeCaps { name: "table-vrf-query", ot: false },
    ModeCaps { name: "table-ot-vrf-query", ot: true },
    ModeCaps { name: "table-complaint", ot: false },
    ModeCaps { name: "table-ot-complaint", ot: true },
    ModeCaps { name: "table-ot-atomic-swap", ot: true },
];

impl Mode {
    /// Number of defined modes
    pub const COUNT: usize = 8;

    /// All modes in wire order
    pub const ALL: [Mode; Mode::COUNT] = [
        Mode::PlainComplaint,
        Mode::PlainOtComplaint,
        Mode::PlainAtomicSwap,
        Mode::TableVrfQuery,
        Mode::TableOtVrfQuery,
        Mode::TableComplaint,
        Mode::TableOtComplaint,
        Mode::TableOtAtomicSwap,
    ];

    /// Wire value
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this mode negotiates oblivious transfer before the Tx phase
    pub fn requires_ot(self) -> bool {
        MODE_CAPS[self as usize].ot
    }

    /// Stable textual name
    pub fn name(self) -> &'static str {
        MODE_CAPS[self as usize].name
    }
}

impl TryFrom<u16> for Mode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        Mode::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| Error::framing(format!("unknown mode: {}", value)))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Mode::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| Error::validation(format!("unknown mode name: {}", s)))
    }
}

// =============================================================================
// MESSAGE TYPE
// =============================================================================

/// Message types carried in the 12-byte header
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MsgType {
    SessionRequest = 0,
    SessionAck = 1,
    SessionClose = 2,
    TxRequest = 3,
    TxResponse = 4,
    TxReceipt = 5,
    NegoRequest = 6,
    NegoAck = 7,
    /// Pipelined ack to the buyer's NegoRequest plus the seller's own request
    NegoAckReq = 8,
}

impl MsgType {
    /// One past the largest valid wire value
    pub const MAX: u16 = 9;

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MsgType {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::SessionRequest),
            1 => Ok(Self::SessionAck),
            2 => Ok(Self::SessionClose),
            3 => Ok(Self::TxRequest),
            4 => Ok(Self::TxResponse),
            5 => Ok(Self::TxReceipt),
            6 => Ok(Self::NegoRequest),
            7 => Ok(Self::NegoAck),
            8 => Ok(Self::NegoAckReq),
            _ => Err(Error::framing(format!(
                "message type {} out of range (max {})",
                value,
                MsgType::MAX
            ))),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// =============================================================================
// NODE STATE
// =============================================================================

/// Position of a node in the combined session and transaction protocol.
///
/// ```text
/// Connected ─┬─(buyer)── SessionAckWait ── SessionAckRecvd ──┐
///            └─(seller)─ SessionReqRecvd ── SessionAckWait ──┴─ SessionEstablished
///
/// SessionEstablished ─(OT)─ NegoAckReqWait / NegoRequestRecvd ─ ... ─ Negotiated ─┐
///                    └──────────────────────────────────────────────────────────────┴─ Tx phase
///
/// buyer:  TxResponseWait ─ TxResponseRecvd ─ TxSecretWait
/// seller: TxRequestRecvd ─ TxReceiptWait ─ TxReceiptRecvd
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Connected,
    SessionAckWait,
    SessionReqRecvd,
    SessionAckRecvd,
    SessionEstablished,
    NegoAckReqWait,
    NegoRequestRecvd,
    NegoAckWait,
    NegoAckReqRecvd,
    Negotiated,
    TxResponseWait,
    TxRequestRecvd,
    TxReceiptWait,
    TxResponseRecvd,
    TxSecretWait,
    TxReceiptRecvd,
    /// Terminal
    Closed,
}

impl NodeState {
    /// Whether a session has been agreed and the node has not closed.
    pub fn is_established(self) -> bool {
        !matches!(
            self,
            Self::Connected
                | Self::SessionAckWait
                | Self::SessionReqRecvd
                | Self::SessionAckRecvd
                | Self::Closed
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::SessionAckWait => "SessionAckWait",
            Self::SessionReqRecvd => "SessionReqRecvd",
            Self::SessionAckRecvd => "SessionAckRecvd",
            Self::SessionEstablished => "SessionEstablished",
            Self::NegoAckReqWait => "NegoAckReqWait",
            Self::NegoRequestRecvd => "NegoRequestRecvd",
            Self::NegoAckWait => "NegoAckWait",
            Self::NegoAckReqRecvd => "NegoAckReqRecvd",
            Self::Negotiated => "Negotiated",
            Self::TxResponseWait => "TxResponseWait",
            Self::TxRequestRecvd => "TxRequestRecvd",
            Self::TxReceiptWait => "TxReceiptWait",
            Self::TxResponseRecvd => "TxResponseRecvd",
            Self::TxSecretWait => "TxSecretWait",
            Self::TxReceiptRecvd => "TxReceiptRecvd",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side of the exchange a node plays
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Dials the connection and pays for data
    Buyer,
    /// Accepts the connection and delivers data
    Seller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buyer => f.write_str("buyer"),
            Self::Seller => f.write_str("seller"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            other => Err(Error::validation(format!("unknown role '{}'", other))),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// An agreed `(id, mode, commitment)` tuple scoping one exchange
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Assigned by the seller; never zero once established
    pub id: u64,
    pub mode: Mode,
    /// Merkle root of the dataset being exchanged
    pub root: Bytes32,
    /// Cached `mode.requires_ot()`
    pub requires_ot: bool,
}

impl Session {
    pub fn new(id: u64, mode: Mode, root: Bytes32) -> Self {
        Self {
            id,
            mode,
            root,
            requires_ot: mode.requires_ot(),
        }
    }
}

// =============================================================================
// IDENTITY AND ADDRESS
// =============================================================================

/// 20-byte identity derived from a public key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(pub [u8; 20]);

impl Identity {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| Error::validation(format!("identity: {}", e)))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::validation("identity must be 20 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Network endpoint plus the identity expected to answer there.
///
/// Two addresses are equal iff both the endpoint and the identity match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// `host:port`
    pub endpoint: String,
    pub identity: Identity,
}

impl Address {
    pub fn new(endpoint: impl Into<String>, identity: Identity) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity,
        }
    }

    pub fn network(&self) -> &'static str {
        NETWORK_NAME
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(tcp {}, eth {})", self.endpoint, self.identity)
    }
}
