//! Fixed wire layouts for podx
//!
//! All multi-byte integers are little-endian. Headers are encoded and decoded
//! as one unit; decoding rejects unknown revisions and out-of-range types.

use crate::error::{Error, Result};
use crate::types::{Bytes32, Mode, MsgType};

/// The only message revision this implementation speaks
pub const PROTOCOL_REVISION: u16 = 1;
/// Size of a message header
pub const HEADER_LEN: usize = 12;

/// The only pre-auth revision this implementation speaks
pub const PREAUTH_REVISION: u8 = 1;
/// Size of a pre-auth header
pub const PREAUTH_HEADER_LEN: usize = 10;
/// Pre-auth request payload: a random nonce
pub const PREAUTH_NONCE_LEN: usize = 1024;
/// Pre-auth ack payload: signature(65) ‖ uncompressed public key(65)
pub const PREAUTH_ACK_LEN: usize = 130;

/// `SessionRequest` / `SessionAck` payload: id(8) ‖ mode(2) ‖ root(32)
pub const SESSION_PAYLOAD_LEN: usize = 42;

/// Largest payload this implementation will hold in memory
pub const MAX_BUFFERED_PAYLOAD: u64 = 64 * 1024 * 1024;

// =============================================================================
// INTEGER HELPERS
// =============================================================================

pub fn put_u16(buf: &mut [u8], v: u16) {
    buf[..2].copy_from_slice(&v.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], v: u64) {
    buf[..8].copy_from_slice(&v.to_le_bytes());
}

pub fn get_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

pub fn get_u64(buf: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(b)
}

// =============================================================================
// MESSAGE HEADER
// =============================================================================

/// Fixed 12-byte message header
///
/// ```text
/// [0..2)  revision (u16)
/// [2..4)  message type (u16, < MsgType::MAX)
/// [4..12) payload length (u64)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub revision: u16,
    pub msg_type: MsgType,
    pub length: u64,
}

impl MessageHeader {
    pub fn new(msg_type: MsgType, length: u64) -> Self {
        Self {
            revision: PROTOCOL_REVISION,
            msg_type,
            length,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        put_u16(&mut buf[0..2], self.revision);
        put_u16(&mut buf[2..4], self.msg_type.as_u16());
        put_u64(&mut buf[4..12], self.length);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != HEADER_LEN {
            return Err(Error::framing(format!(
                "header must be {} bytes, got {}",
                HEADER_LEN,
                buf.len()
            )));
        }
        let revision = get_u16(&buf[0..2]);
        if revision != PROTOCOL_REVISION {
            return Err(Error::framing(format!("unsupported revision: {}", revision)));
        }
        let msg_type = MsgType::try_from(get_u16(&buf[2..4]))?;
        Ok(Self {
            revision,
            msg_type,
            length: get_u64(&buf[4..12]),
        })
    }
}

// =============================================================================
// PRE-AUTH HEADER
// =============================================================================

/// Pre-auth message kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PreAuthType {
    Request = 0,
    Ack = 1,
}

impl TryFrom<u8> for PreAuthType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Ack),
            _ => Err(Error::framing(format!("unknown pre-auth type: {}", value))),
        }
    }
}

/// Fixed 10-byte pre-auth header
///
/// ```text
/// [0]     revision (u8)
/// [1]     type (u8: 0 = Request, 1 = Ack)
/// [2..10) payload size (u64)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreAuthHeader {
    pub revision: u8,
    pub msg_type: PreAuthType,
    pub size: u64,
}

impl PreAuthHeader {
    pub fn new(msg_type: PreAuthType, size: u64) -> Self {
        Self {
            revision: PREAUTH_REVISION,
            msg_type,
            size,
        }
    }

    pub fn encode(&self) -> [u8; PREAUTH_HEADER_LEN] {
        let mut buf = [0u8; PREAUTH_HEADER_LEN];
        buf[0] = self.revision;
        buf[1] = self.msg_type as u8;
        put_u64(&mut buf[2..10], self.size);
        buf
    }

    pub fn decode(buf: &[u8; PREAUTH_HEADER_LEN]) -> Result<Self> {
        if buf[0] != PREAUTH_REVISION {
            return Err(Error::framing(format!("unsupported pre-auth revision: {}", buf[0])));
        }
        Ok(Self {
            revision: buf[0],
            msg_type: PreAuthType::try_from(buf[1])?,
            size: get_u64(&buf[2..10]),
        })
    }

    /// Check kind and exact declared size for the expected message.
    pub fn expect(&self, msg_type: PreAuthType, size: usize) -> Result<()> {
        if self.msg_type != msg_type {
            return Err(Error::framing(format!(
                "expected pre-auth {:?}, got {:?}",
                msg_type, self.msg_type
            )));
        }
        if self.size != size as u64 {
            return Err(Error::framing(format!(
                "pre-auth {:?} declares {} bytes, expected {}",
                msg_type, self.size, size
            )));
        }
        Ok(())
    }
}

// =============================================================================
// TYPED PAYLOADS
// =============================================================================

/// Body of `SessionRequest` and `SessionAck`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionPayload {
    pub id: u64,
    pub mode: Mode,
    pub root: Bytes32,
}

impl SessionPayload {
    pub fn encode(&self) -> [u8; SESSION_PAYLOAD_LEN] {
        let mut buf = [0u8; SESSION_PAYLOAD_LEN];
        put_u64(&mut buf[0..8], self.id);
        put_u16(&mut buf[8..10], self.mode.as_u16());
        buf[10..42].copy_from_slice(&self.root);
        buf
    }

    /// Decode from the first 42 bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SESSION_PAYLOAD_LEN {
            return Err(Error::framing(format!(
                "session payload needs {} bytes, got {}",
                SESSION_PAYLOAD_LEN,
                buf.len()
            )));
        }
        let mut root = [0u8; 32];
        root.copy_from_slice(&buf[10..42]);
        Ok(Self {
            id: get_u64(&buf[0..8]),
            mode: Mode::try_from(get_u16(&buf[8..10]))?,
            root,
        })
    }
}

/// Encode the pipelined `NegoAckReq` body: `ack_len ‖ ack ‖ req_len ‖ req`.
pub fn encode_nego_ack_req(ack: &[u8], req: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + ack.len() + req.len());
    out.extend_from_slice(&(ack.len() as u64).to_le_bytes());
    out.extend_from_slice(ack);
    out.extend_from_slice(&(req.len() as u64).to_le_bytes());
    out.extend_from_slice(req);
    out
}

/// Split a `NegoAckReq` body into `(ack, req)`.
///
/// The two embedded lengths must account for every byte of `buf`.
pub fn decode_nego_ack_req(buf: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let (ack, rest) = take_prefixed(buf, "ack")?;
    let (req, rest) = take_prefixed(rest, "request")?;
    if !rest.is_empty() {
        return Err(Error::framing(format!(
            "{} trailing bytes after nego ack+request",
            rest.len()
        )));
    }
    Ok((ack.to_vec(), req.to_vec()))
}

fn take_prefixed<'a>(buf: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8])> {
    if buf.len() < 8 {
        return Err(Error::framing(format!("truncated {} length", what)));
    }
    let len = get_u64(&buf[..8]);
    let body = &buf[8..];
    if len > body.len() as u64 {
        return Err(Error::framing(format!(
            "{} declares {} bytes, {} available",
            what,
            len,
            body.len()
        )));
    }
    Ok(body.split_at(len as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = MessageHeader::new(MsgType::NegoAckReq, 1 << 40);
        let decoded = MessageHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_rejects_bad_revision() {
        let mut buf = MessageHeader::new(MsgType::TxRequest, 3).encode();
        buf[0] = 2;
        assert!(matches!(MessageHeader::decode(&buf), Err(Error::Framing(_))));
    }

    #[test]
    fn test_header_rejects_bad_type() {
        let mut buf = MessageHeader::new(MsgType::TxRequest, 3).encode();
        put_u16(&mut buf[2..4], MsgType::MAX);
        assert!(matches!(MessageHeader::decode(&buf), Err(Error::Framing(_))));
    }

    #[test]
    fn test_header_rejects_short_buffer() {
        let buf = MessageHeader::new(MsgType::TxRequest, 3).encode();
        assert!(matches!(MessageHeader::decode(&buf[..11]), Err(Error::Framing(_))));
    }

    #[test]
    fn test_preauth_header_expect() {
        let header = PreAuthHeader::new(PreAuthType::Ack, PREAUTH_ACK_LEN as u64);
        let decoded = PreAuthHeader::decode(&header.encode()).unwrap();
        assert!(decoded.expect(PreAuthType::Ack, PREAUTH_ACK_LEN).is_ok());
        assert!(decoded.expect(PreAuthType::Request, PREAUTH_ACK_LEN).is_err());
        assert!(decoded.expect(PreAuthType::Ack, 129).is_err());
    }

    #[test]
    fn test_preauth_header_rejects_unknown_type() {
        let mut buf = PreAuthHeader::new(PreAuthType::Request, 1024).encode();
        buf[1] = 2;
        assert!(matches!(PreAuthHeader::decode(&buf), Err(Error::Framing(_))));
    }

    #[test]
    fn test_session_payload_rejects_unknown_mode() {
        let mut buf = SessionPayload {
            id: 9,
            mode: Mode::TableComplaint,
            root: [3; 32],
        }
        .encode();
        put_u16(&mut buf[8..10], 99);
        assert!(matches!(SessionPayload::decode(&buf), Err(Error::Framing(_))));
    }

    #[test]
    fn test_nego_ack_req_split() {
        let body = encode_nego_ack_req(b"ack-bytes", b"B");
        let (ack, req) = decode_nego_ack_req(&body).unwrap();
        assert_eq!(ack, b"ack-bytes");
        assert_eq!(req, b"B");

        let (ack, req) = decode_nego_ack_req(&encode_nego_ack_req(b"", b"")).unwrap();
        assert!(ack.is_empty() && req.is_empty());
    }

    #[test]
    fn test_nego_ack_req_rejects_inconsistent_lengths() {
        let mut body = encode_nego_ack_req(b"ack", b"req");
        body.push(0);
        assert!(matches!(decode_nego_ack_req(&body), Err(Error::Framing(_))));

        let body = encode_nego_ack_req(b"ack", b"req");
        assert!(decode_nego_ack_req(&body[..body.len() - 1]).is_err());
        assert!(decode_nego_ack_req(&body[..5]).is_err());

        let mut huge = Vec::new();
        huge.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(decode_nego_ack_req(&huge).is_err());
    }
}
