//! Authenticated connection with arbitrary-length transfers
//!
//! A [`Connection`] owns one [`SecureChannel`]. Its handshake runs the
//! plaintext pre-auth exchange, then the channel handshake, and cross-checks
//! the two. Transfers of any size are announced with a `SIZE` message and
//! streamed as bounded `CHUNK` messages, so neither side buffers more than
//! one chunk at a time.

use crate::channel::SecureChannel;
use crate::framing::{code, MAX_CHUNK_SIZE};
use crate::preauth::{self, DEFAULT_PREAUTH_TIMEOUT};
use k256::ecdsa::VerifyingKey;
use podx_core::crypto::{identity_of, KeyPair};
use podx_core::wire::get_u64;
use podx_core::{Address, Error, Result};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// One authenticated, encrypted connection to a peer
pub struct Connection<S> {
    channel: SecureChannel<S>,
    local: Address,
    /// Known up front when dialing; learned from the handshake when accepting
    remote: Option<Address>,
    /// Endpoint of the peer as seen by the transport
    peer_endpoint: String,
    is_initiator: bool,
    preauth_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream we dialed to `remote`.
    pub fn dialed(stream: S, local: Address, remote: Address) -> Self {
        Self {
            channel: SecureChannel::new(stream),
            local,
            peer_endpoint: remote.endpoint.clone(),
            remote: Some(remote),
            is_initiator: true,
            preauth_timeout: DEFAULT_PREAUTH_TIMEOUT,
        }
    }

    /// Wrap a stream accepted from `peer_endpoint`.
    pub fn accepted(stream: S, local: Address, peer_endpoint: impl Into<String>) -> Self {
        Self {
            channel: SecureChannel::new(stream),
            local,
            remote: None,
            peer_endpoint: peer_endpoint.into(),
            is_initiator: false,
            preauth_timeout: DEFAULT_PREAUTH_TIMEOUT,
        }
    }

    /// Set the per-call deadline used during pre-auth
    pub fn with_preauth_timeout(mut self, deadline: Duration) -> Self {
        self.preauth_timeout = deadline;
        self
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    pub fn local_address(&self) -> &Address {
        &self.local
    }

    /// The verified remote address; `None` until an accepting handshake completes.
    pub fn remote_address(&self) -> Option<&Address> {
        self.remote.as_ref()
    }

    /// Authenticate the peer and secure the channel.
    ///
    /// The dialing side pre-authenticates the identity it dialed and then
    /// requires the channel handshake to yield the same key. The accepting
    /// side adopts whatever key the channel handshake verifies.
    pub async fn handshake(&mut self, keypair: &KeyPair) -> Result<VerifyingKey> {
        if self.channel.is_secured() {
            return Err(Error::protocol("connection handshake already completed"));
        }

        if self.is_initiator {
            let expected = self
                .remote
                .as_ref()
                .map(|r| r.identity)
                .ok_or_else(|| Error::protocol("dialed connection has no remote address"))?;

            let preauth_key =
                preauth::initiate(self.channel.get_mut(), &expected, self.preauth_timeout).await?;
            let channel_key = self.channel.handshake(keypair, true).await?;
            if channel_key != preauth_key {
                warn!("Channel key differs from pre-authenticated key for {}", expected);
                return Err(Error::auth(format!(
                    "channel handshake yielded {}, pre-auth verified {}",
                    identity_of(&channel_key),
                    expected
                )));
            }
            debug!("Connected to {}", Address::new(self.peer_endpoint.clone(), expected));
            Ok(channel_key)
        } else {
            preauth::respond(self.channel.get_mut(), keypair, self.preauth_timeout).await?;
            let channel_key = self.channel.handshake(keypair, false).await?;
            let remote = Address::new(self.peer_endpoint.clone(), identity_of(&channel_key));
            debug!("Accepted {}", remote);
            self.remote = Some(remote);
            Ok(channel_key)
        }
    }

    /// Send exactly `size` bytes from `reader`.
    pub async fn write<R>(&mut self, reader: R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.channel.write_msg(code::SIZE, &size.to_le_bytes()).await?;

        let mut reader = reader.take(size);
        let mut buf = vec![0u8; chunk_len(size)];
        let mut sent = 0u64;
        while sent < size {
            let want = chunk_len(size - sent);
            let n = fill(&mut reader, &mut buf[..want]).await?;
            if n == 0 {
                return Err(Error::transport(
                    ErrorKind::UnexpectedEof,
                    format!("source ended after {} of {} bytes", sent, size),
                ));
            }
            self.channel.write_msg(code::CHUNK, &buf[..n]).await?;
            sent += n as u64;
        }
        Ok(())
    }

    /// Receive one transfer into `writer` and return its length.
    pub async fn read<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let size = self.read_announcement().await?;
        self.stream_chunks(writer, size).await?;
        Ok(size)
    }

    /// Receive one transfer that must be exactly `expected` bytes long.
    pub async fn read_exact<W>(&mut self, writer: &mut W, expected: u64) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let size = self.read_announcement().await?;
        if size != expected {
            return Err(Error::framing(format!(
                "transfer announces {} bytes, expected {}",
                size, expected
            )));
        }
        self.stream_chunks(writer, size).await
    }

    async fn read_announcement(&mut self) -> Result<u64> {
        let (msg_code, announce) = self.channel.read_msg().await?;
        if msg_code != code::SIZE || announce.len() != 8 {
            return Err(Error::framing(format!(
                "expected size announcement, got code {:#04x} with {} bytes",
                msg_code,
                announce.len()
            )));
        }
        Ok(get_u64(&announce))
    }

    async fn stream_chunks<W>(&mut self, writer: &mut W, size: u64) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut received = 0u64;
        while received < size {
            let (msg_code, chunk) = self.channel.read_msg().await?;
            if msg_code != code::CHUNK {
                return Err(Error::framing(format!(
                    "expected data chunk, got code {:#04x}",
                    msg_code
                )));
            }
            let remaining = size - received;
            if chunk.len() as u64 > remaining {
                return Err(Error::framing(format!(
                    "transfer overran declared size {} by {} bytes",
                    size,
                    chunk.len() as u64 - remaining
                )));
            }
            writer.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Shut the connection down.
    pub async fn close(&mut self) -> Result<()> {
        self.channel.close().await
    }
}

fn chunk_len(remaining: u64) -> usize {
    remaining.min(MAX_CHUNK_SIZE as u64) as usize
}

/// Read until `buf` is full or the source ends.
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
