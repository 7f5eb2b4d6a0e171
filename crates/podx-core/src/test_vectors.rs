//! Fixed wire vectors for cross-implementation validation
//!
//! These byte sequences MUST be reproduced exactly by any other implementation.

use crate::types::*;
use crate::wire::*;

#[test]
fn le_u64_vector() {
    let mut buf = [0u8; 8];
    put_u64(&mut buf, 0x1234_5678_dead_beaf);
    assert_eq!(buf, [0xaf, 0xbe, 0xad, 0xde, 0x78, 0x56, 0x34, 0x12]);
    assert_eq!(get_u64(&buf), 0x1234_5678_dead_beaf);
}

#[test]
fn le_u16_vector() {
    let mut buf = [0u8; 2];
    put_u16(&mut buf, 0xbeef);
    assert_eq!(buf, [0xef, 0xbe]);
    assert_eq!(get_u16(&buf), 0xbeef);
}

#[test]
fn le_integer_edges() {
    for v in [0u64, 1, 0xff, 0x100, u32::MAX as u64, u64::MAX - 1, u64::MAX] {
        let mut buf = [0u8; 8];
        put_u64(&mut buf, v);
        assert_eq!(get_u64(&buf), v);
    }
    for v in [0u16, 1, 0x00ff, 0xff00, u16::MAX] {
        let mut buf = [0u8; 2];
        put_u16(&mut buf, v);
        assert_eq!(get_u16(&buf), v);
    }
}

#[test]
fn message_header_vector() {
    let header = MessageHeader::new(MsgType::TxReceipt, 0x1234_5678_dead_beaf);
    assert_eq!(
        hex::encode(header.encode()),
        "01000500afbeadde78563412"
    );
}

#[test]
fn preauth_header_vector() {
    let header = PreAuthHeader::new(PreAuthType::Request, PREAUTH_NONCE_LEN as u64);
    assert_eq!(hex::encode(header.encode()), "01000004000000000000");
}

#[test]
fn session_payload_vector() {
    let payload = SessionPayload {
        id: 0x0102_0304_0506_0708,
        mode: Mode::TableOtAtomicSwap,
        root: [0xaa; 32],
    };
    let bytes = payload.encode();
    assert_eq!(hex::encode(&bytes[..10]), "08070605040302010700");
    assert_eq!(&bytes[10..], &[0xaa; 32]);
    assert_eq!(SessionPayload::decode(&bytes).unwrap(), payload);
}

#[test]
fn nego_ack_req_vector() {
    let body = encode_nego_ack_req(b"ok", b"xyz");
    assert_eq!(
        hex::encode(body),
        "02000000000000006f6b030000000000000078797a"
    );
}
