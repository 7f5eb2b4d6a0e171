//! Pre-authentication handshake
//!
//! Runs in plaintext over the raw stream before the channel handshake. The
//! initiator sends a 1024-byte random nonce; the responder answers with
//! `sig(keccak256(nonce)) ‖ pubkey`. The initiator accepts only if the key
//! hashes to the identity it dialed and the signature recovers to that key.
//!
//! Every individual read or write call is bounded by the deadline, renewed
//! per call, so a slow but live peer still completes.

use k256::ecdsa::VerifyingKey;
use podx_core::crypto::{
    decode_public_key, identity_of, keccak256, verify_signer, KeyPair, SIGNATURE_LEN,
};
use podx_core::wire::{
    PreAuthHeader, PreAuthType, PREAUTH_ACK_LEN, PREAUTH_HEADER_LEN, PREAUTH_NONCE_LEN,
};
use podx_core::{Error, Identity, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default per-call I/O deadline
pub const DEFAULT_PREAUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Challenge the responder and return its verified public key.
pub async fn initiate<S>(
    stream: &mut S,
    expected: &Identity,
    deadline: Duration,
) -> Result<VerifyingKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut nonce = vec![0u8; PREAUTH_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut request = Vec::with_capacity(PREAUTH_HEADER_LEN + PREAUTH_NONCE_LEN);
    let header = PreAuthHeader::new(PreAuthType::Request, PREAUTH_NONCE_LEN as u64);
    request.extend_from_slice(&header.encode());
    request.extend_from_slice(&nonce);
    write_full(stream, &request, deadline).await?;

    let ack = read_message(stream, PreAuthType::Ack, PREAUTH_ACK_LEN, deadline).await?;
    let (signature, public_key) = ack.split_at(SIGNATURE_LEN);

    let key = decode_public_key(public_key)
        .map_err(|_| Error::framing("pre-auth ack carries an undecodable public key"))?;
    let claimed = identity_of(&key);
    if &claimed != expected {
        warn!("Pre-auth identity mismatch: expected {}, got {}", expected, claimed);
        return Err(Error::auth(format!(
            "pre-auth key belongs to {}, expected {}",
            claimed, expected
        )));
    }
    verify_signer(&keccak256(&nonce), signature, &key)?;

    debug!("Pre-auth verified {}", claimed);
    Ok(key)
}

/// Answer the initiator's challenge with our signature and public key.
pub async fn respond<S>(stream: &mut S, keypair: &KeyPair, deadline: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce = read_message(stream, PreAuthType::Request, PREAUTH_NONCE_LEN, deadline).await?;
    let signature = keypair.sign_digest(&keccak256(&nonce))?;

    let mut ack = Vec::with_capacity(PREAUTH_HEADER_LEN + PREAUTH_ACK_LEN);
    ack.extend_from_slice(&PreAuthHeader::new(PreAuthType::Ack, PREAUTH_ACK_LEN as u64).encode());
    ack.extend_from_slice(&signature);
    ack.extend_from_slice(&keypair.public_key());
    write_full(stream, &ack, deadline).await?;

    debug!("Pre-auth answered as {}", keypair.identity());
    Ok(())
}

async fn read_message<S>(
    stream: &mut S,
    msg_type: PreAuthType,
    size: usize,
    deadline: Duration,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; PREAUTH_HEADER_LEN];
    read_full(stream, &mut header, deadline).await?;
    PreAuthHeader::decode(&header)?.expect(msg_type, size)?;

    let mut payload = vec![0u8; size];
    read_full(stream, &mut payload, deadline).await?;
    Ok(payload)
}

async fn read_full<S>(stream: &mut S, buf: &mut [u8], deadline: Duration) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = match timeout(deadline, stream.read(&mut buf[filled..])).await {
            Ok(result) => result?,
            Err(_) => return Err(deadline_exceeded()),
        };
        if n == 0 {
            return Err(Error::transport(
                ErrorKind::UnexpectedEof,
                "peer closed during pre-auth",
            ));
        }
        filled += n;
    }
    Ok(())
}

async fn write_full<S>(stream: &mut S, buf: &[u8], deadline: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < buf.len() {
        let n = match timeout(deadline, stream.write(&buf[written..])).await {
            Ok(result) => result?,
            Err(_) => return Err(deadline_exceeded()),
        };
        if n == 0 {
            return Err(Error::transport(ErrorKind::WriteZero, "peer closed during pre-auth"));
        }
        written += n;
    }
    match timeout(deadline, stream.flush()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(deadline_exceeded()),
    }
}

fn deadline_exceeded() -> Error {
    Error::transport(ErrorKind::TimedOut, "pre-auth I/O deadline exceeded")
}

#[cfg(test)]
mod tests {
    use super::*;
    use podx_core::wire::put_u64;
    use tokio::io::duplex;

    const DEADLINE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_preauth_binds_identity() {
        let (mut a, mut b) = duplex(4096);
        let seller = KeyPair::generate();
        let expected = seller.identity();
        let seller_key = seller.verifying_key();

        let responder = tokio::spawn(async move { respond(&mut b, &seller, DEADLINE).await });
        let key = initiate(&mut a, &expected, DEADLINE).await.unwrap();
        responder.await.unwrap().unwrap();

        assert_eq!(key, seller_key);
    }

    #[tokio::test]
    async fn test_preauth_wrong_identity() {
        let (mut a, mut b) = duplex(4096);
        let seller = KeyPair::generate();
        let someone_else = KeyPair::generate().identity();

        let responder = tokio::spawn(async move { respond(&mut b, &seller, DEADLINE).await });
        let err = initiate(&mut a, &someone_else, DEADLINE).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        let _ = responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_preauth_signature_from_other_key() {
        let (mut a, mut b) = duplex(4096);
        let claimed = KeyPair::generate();
        let expected = claimed.identity();
        let claimed_pub = claimed.public_key();

        // Present the expected key but sign with a different one.
        let responder = tokio::spawn(async move {
            let mut header = [0u8; PREAUTH_HEADER_LEN];
            b.read_exact(&mut header).await.unwrap();
            let mut nonce = vec![0u8; PREAUTH_NONCE_LEN];
            b.read_exact(&mut nonce).await.unwrap();

            let forger = KeyPair::generate();
            let mut ack = PreAuthHeader::new(PreAuthType::Ack, PREAUTH_ACK_LEN as u64)
                .encode()
                .to_vec();
            ack.extend_from_slice(&forger.sign_digest(&keccak256(&nonce)).unwrap());
            ack.extend_from_slice(&claimed_pub);
            b.write_all(&ack).await.unwrap();
        });

        let err = initiate(&mut a, &expected, DEADLINE).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_preauth_undecodable_key_is_framing_error() {
        let (mut a, mut b) = duplex(4096);
        let expected = KeyPair::generate().identity();

        let responder = tokio::spawn(async move {
            let mut request = vec![0u8; PREAUTH_HEADER_LEN + PREAUTH_NONCE_LEN];
            b.read_exact(&mut request).await.unwrap();

            let mut ack = PreAuthHeader::new(PreAuthType::Ack, PREAUTH_ACK_LEN as u64)
                .encode()
                .to_vec();
            ack.extend_from_slice(&[0u8; PREAUTH_ACK_LEN]);
            b.write_all(&ack).await.unwrap();
        });

        let err = initiate(&mut a, &expected, DEADLINE).await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {err:?}");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_preauth_oversized_request_rejected() {
        let (mut a, mut b) = duplex(4096);
        let mut header = PreAuthHeader::new(PreAuthType::Request, 0).encode();
        put_u64(&mut header[2..10], 1 << 32);
        a.write_all(&header).await.unwrap();

        let err = respond(&mut b, &KeyPair::generate(), DEADLINE).await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[tokio::test]
    async fn test_preauth_bad_revision_rejected() {
        let (mut a, mut b) = duplex(4096);
        let mut header =
            PreAuthHeader::new(PreAuthType::Request, PREAUTH_NONCE_LEN as u64).encode();
        header[0] = 9;
        a.write_all(&header).await.unwrap();

        let err = respond(&mut b, &KeyPair::generate(), DEADLINE).await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preauth_stalled_peer_times_out() {
        let (mut a, _b) = duplex(4096);
        let expected = KeyPair::generate().identity();

        let err = initiate(&mut a, &expected, Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            Error::Transport(io) => assert_eq!(io.kind(), ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
