//! Encrypted, message-coded channel
//!
//! The channel carries `(code, payload)` messages over any byte stream. Its
//! handshake authenticates both ends with their secp256k1 identity keys and
//! returns the verified remote key; every later frame is AEAD-sealed.

use crate::crypto::{CryptoError, EphemeralKeyExchange, SessionKeys};
use crate::framing::{code, Frame, FrameCodec, FrameError};
use futures::{SinkExt, StreamExt};
use k256::ecdsa::VerifyingKey;
use podx_core::crypto::{
    decode_public_key, keccak256, verify_signer, KeyPair, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};
use podx_core::{Bytes32, Error, Result};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

const TRANSCRIPT_DOMAIN: &[u8] = b"podx-channel";
const ROLE_INITIATOR: u8 = 0x01;
const ROLE_RESPONDER: u8 = 0x02;

/// Secure message channel over a byte stream
pub struct SecureChannel<S> {
    framed: Framed<S, FrameCodec>,
    keys: Option<SessionKeys>,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
            keys: None,
        }
    }

    /// Raw access to the stream, for exchanges that run before the handshake.
    pub fn get_mut(&mut self) -> &mut S {
        self.framed.get_mut()
    }

    /// Whether the handshake has completed
    pub fn is_secured(&self) -> bool {
        self.keys.is_some()
    }

    /// Run the key-exchange handshake and return the peer's verified identity key.
    pub async fn handshake(
        &mut self,
        keypair: &KeyPair,
        is_initiator: bool,
    ) -> Result<VerifyingKey> {
        if self.keys.is_some() {
            return Err(Error::protocol("channel handshake already completed"));
        }

        let exchange = EphemeralKeyExchange::new();
        let our_eph = exchange.public_key();
        self.send_frame(Frame::new(code::HELLO, our_eph.to_vec())).await?;

        let hello = self.recv_frame().await?;
        if hello.code != code::HELLO || hello.payload.len() != 32 {
            return Err(Error::framing(format!(
                "bad channel hello: code {:#04x}, {} bytes",
                hello.code,
                hello.payload.len()
            )));
        }
        let mut their_eph = [0u8; 32];
        their_eph.copy_from_slice(&hello.payload);

        let transcript = if is_initiator {
            transcript_hash(&our_eph, &their_eph)
        } else {
            transcript_hash(&their_eph, &our_eph)
        };
        let (our_role, their_role) = if is_initiator {
            (ROLE_INITIATOR, ROLE_RESPONDER)
        } else {
            (ROLE_RESPONDER, ROLE_INITIATOR)
        };

        let signature = keypair.sign_digest(&auth_digest(&transcript, our_role))?;
        let mut auth = Vec::with_capacity(PUBLIC_KEY_LEN + SIGNATURE_LEN);
        auth.extend_from_slice(&keypair.public_key());
        auth.extend_from_slice(&signature);
        self.send_frame(Frame::new(code::AUTH, auth)).await?;

        let auth = self.recv_frame().await?;
        if auth.code != code::AUTH || auth.payload.len() != PUBLIC_KEY_LEN + SIGNATURE_LEN {
            return Err(Error::framing(format!(
                "bad channel auth: code {:#04x}, {} bytes",
                auth.code,
                auth.payload.len()
            )));
        }
        let their_key = decode_public_key(&auth.payload[..PUBLIC_KEY_LEN])?;
        if let Err(e) = verify_signer(
            &auth_digest(&transcript, their_role),
            &auth.payload[PUBLIC_KEY_LEN..],
            &their_key,
        ) {
            warn!("Channel handshake signature rejected: {}", e);
            return Err(e);
        }

        let shared = exchange.exchange(&their_eph);
        let keys = SessionKeys::derive(&shared, is_initiator, &transcript).map_err(crypto_error)?;
        self.keys = Some(keys);

        debug!("Channel secured (initiator: {})", is_initiator);
        Ok(their_key)
    }

    /// Seal and send one message.
    pub async fn write_msg(&mut self, code: u8, payload: &[u8]) -> Result<()> {
        let keys = self.keys.as_mut().ok_or_else(not_secured)?;
        let sealed = keys.encrypt(payload, &[code]).map_err(crypto_error)?;
        self.send_frame(Frame::new(code, sealed)).await
    }

    /// Receive and open one message.
    pub async fn read_msg(&mut self) -> Result<(u8, Vec<u8>)> {
        if self.keys.is_none() {
            return Err(not_secured());
        }
        let frame = self.recv_frame().await?;
        let keys = self.keys.as_mut().ok_or_else(not_secured)?;
        let payload = keys
            .decrypt(&frame.payload, &[frame.code])
            .map_err(crypto_error)?;
        Ok((frame.code, payload))
    }

    /// Flush and shut down the underlying stream.
    pub async fn close(&mut self) -> Result<()> {
        self.framed.close().await.map_err(frame_error)
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.framed.send(frame).await.map_err(frame_error)
    }

    async fn recv_frame(&mut self) -> Result<Frame> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(frame_error(e)),
            None => Err(Error::transport(
                ErrorKind::UnexpectedEof,
                "channel closed by peer",
            )),
        }
    }
}

fn transcript_hash(initiator_eph: &[u8; 32], responder_eph: &[u8; 32]) -> Bytes32 {
    let mut buf = Vec::with_capacity(TRANSCRIPT_DOMAIN.len() + 64);
    buf.extend_from_slice(TRANSCRIPT_DOMAIN);
    buf.extend_from_slice(initiator_eph);
    buf.extend_from_slice(responder_eph);
    keccak256(&buf)
}

fn auth_digest(transcript: &Bytes32, role: u8) -> Bytes32 {
    let mut buf = [0u8; 33];
    buf[..32].copy_from_slice(transcript);
    buf[32] = role;
    keccak256(&buf)
}

fn not_secured() -> Error {
    Error::transport(ErrorKind::NotConnected, "channel handshake not completed")
}

fn frame_error(e: FrameError) -> Error {
    match e {
        FrameError::Io(io) => Error::Transport(io),
        other => Error::framing(other.to_string()),
    }
}

fn crypto_error(e: CryptoError) -> Error {
    Error::transport(ErrorKind::InvalidData, e.to_string())
}
