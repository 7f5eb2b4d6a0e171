//! Shared helpers for podx-net integration tests.

#![allow(dead_code)]

use podx_core::crypto::KeyPair;
use podx_core::Address;
use podx_net::{dial, Listener, Node};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

pub const PREAUTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Pair {
    pub buyer: Node<TcpStream>,
    pub seller: Node<TcpStream>,
    pub buyer_key: Arc<KeyPair>,
    pub seller_key: Arc<KeyPair>,
}

/// Connect a buyer and a seller over loopback TCP.
pub async fn connected_pair() -> Pair {
    let buyer_key = Arc::new(KeyPair::generate());
    let seller_key = Arc::new(KeyPair::generate());

    let listener = Listener::bind("127.0.0.1:0", &seller_key).await.unwrap();
    let seller_addr: Address = listener.local_address().clone();

    let accept_key = Arc::clone(&seller_key);
    let accept = tokio::spawn(async move {
        let conn = listener.accept().await.unwrap();
        Node::establish(conn, accept_key).await.unwrap()
    });

    let buyer = dial(seller_addr, Arc::clone(&buyer_key), PREAUTH_TIMEOUT)
        .await
        .unwrap();
    let seller = accept.await.unwrap();

    Pair {
        buyer,
        seller,
        buyer_key,
        seller_key,
    }
}

/// Byte expected at offset `pos` of a generated stream.
pub fn pattern_byte(pos: u64) -> u8 {
    (pos % 251) as u8
}

/// Deterministic source of `len` pattern bytes.
pub struct PatternReader {
    pos: u64,
    len: u64,
}

impl PatternReader {
    pub fn new(len: u64) -> Self {
        Self { pos: 0, len }
    }
}

impl AsyncRead for PatternReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = (buf.remaining() as u64).min(this.len - this.pos) as usize;
        let chunk: Vec<u8> = (0..n as u64).map(|i| pattern_byte(this.pos + i)).collect();
        buf.put_slice(&chunk);
        this.pos += n as u64;
        Poll::Ready(Ok(()))
    }
}

/// Sink that checks every byte against the pattern without storing it.
#[derive(Default)]
pub struct PatternChecker {
    pub received: u64,
    pub mismatches: u64,
}

impl AsyncWrite for PatternChecker {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        for (i, b) in buf.iter().enumerate() {
            if *b != pattern_byte(this.received + i as u64) {
                this.mismatches += 1;
            }
        }
        this.received += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
