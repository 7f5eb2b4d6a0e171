//! Streaming receipt signing and verification
//!
//! A `TxReceipt` payload is `receipt ‖ signature(65)`, where the signature
//! covers `keccak256(receipt)`. Putting the signature last lets both sides
//! hash the receipt while it streams, whatever its size.

use podx_core::crypto::{KeyPair, SignatureBytes, SIGNATURE_LEN};
use podx_core::Bytes32;
use sha3::{Digest, Keccak256};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Reader that yields the receipt body followed by its signature.
///
/// The signature is computed when the body reaches end of stream.
pub struct SigningReader<'a, R> {
    body: R,
    keypair: &'a KeyPair,
    hasher: Keccak256,
    trailer: Option<SignatureBytes>,
    served: usize,
}

impl<'a, R> SigningReader<'a, R> {
    pub fn new(body: R, keypair: &'a KeyPair) -> Self {
        Self {
            body,
            keypair,
            hasher: Keccak256::new(),
            trailer: None,
            served: 0,
        }
    }
}

impl<R> AsyncRead for SigningReader<'_, R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if this.trailer.is_none() {
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.body).poll_read(cx, buf))?;
            let fresh = &buf.filled()[before..];
            if !fresh.is_empty() {
                this.hasher.update(fresh);
                return Poll::Ready(Ok(()));
            }

            let digest: Bytes32 = this.hasher.finalize_reset().into();
            let signature = this
                .keypair
                .sign_digest(&digest)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            this.trailer = Some(signature);
        }

        if let Some(trailer) = &this.trailer {
            let rest = &trailer[this.served..];
            let n = rest.len().min(buf.remaining());
            buf.put_slice(&rest[..n]);
            this.served += n;
        }
        Poll::Ready(Ok(()))
    }
}

/// Writer that forwards the receipt body to `inner` while hashing it, and
/// keeps the trailing signature aside.
pub struct ReceiptSink<'a, W> {
    inner: &'a mut W,
    hasher: Keccak256,
    body_remaining: u64,
    signature: Vec<u8>,
}

impl<'a, W> ReceiptSink<'a, W> {
    /// `payload_len` is the full message length, signature included.
    pub fn new(inner: &'a mut W, payload_len: u64) -> Self {
        Self {
            inner,
            hasher: Keccak256::new(),
            body_remaining: payload_len.saturating_sub(SIGNATURE_LEN as u64),
            signature: Vec::with_capacity(SIGNATURE_LEN),
        }
    }

    /// Digest of the forwarded body and the captured signature bytes.
    pub fn finish(self) -> (Bytes32, Vec<u8>) {
        (self.hasher.finalize().into(), self.signature)
    }
}

impl<W> AsyncWrite for ReceiptSink<'_, W>
where
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.body_remaining > 0 {
            let n = (buf.len() as u64).min(this.body_remaining) as usize;
            let written = ready!(Pin::new(&mut *this.inner).poll_write(cx, &buf[..n]))?;
            this.hasher.update(&buf[..written]);
            this.body_remaining -= written as u64;
            return Poll::Ready(Ok(written));
        }

        if this.signature.len() + buf.len() > SIGNATURE_LEN {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "receipt payload longer than declared",
            )));
        }
        this.signature.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}
