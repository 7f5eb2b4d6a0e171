//! Protocol node
//!
//! A [`Node`] exclusively owns one [`Connection`] and drives the session and
//! transaction state machines over it. Operations are the only legal way to
//! move between states; each one checks the current state, performs exactly
//! one send or receive, and advances only if everything succeeded.

use crate::connection::Connection;
use k256::ecdsa::VerifyingKey;
use podx_core::crypto::KeyPair;
use podx_core::wire::{MessageHeader, SessionPayload, HEADER_LEN, MAX_BUFFERED_PAYLOAD};
use podx_core::{Address, Error, MsgType, NodeState, Result, Role, Session};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// One side of a buyer/seller exchange
pub struct Node<S> {
    pub(crate) conn: Connection<S>,
    pub(crate) keypair: Arc<KeyPair>,
    pub(crate) remote_key: VerifyingKey,
    pub(crate) role: Role,
    state: NodeState,
    pub(crate) session: Option<Session>,
    /// Session parameters sent or received but not yet agreed
    pub(crate) pending: Option<SessionPayload>,
}

impl<S> Node<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Authenticate `conn` and start in `Connected`.
    ///
    /// The dialing side of the connection becomes the buyer.
    pub async fn establish(mut conn: Connection<S>, keypair: Arc<KeyPair>) -> Result<Self> {
        let remote_key = conn.handshake(&keypair).await?;
        let role = if conn.is_initiator() {
            Role::Buyer
        } else {
            Role::Seller
        };
        debug!("Node ready as {}", role);
        Ok(Self {
            conn,
            keypair,
            remote_key,
            role,
            state: NodeState::Connected,
            session: None,
            pending: None,
        })
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The agreed session, once established
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn remote_public_key(&self) -> &VerifyingKey {
        &self.remote_key
    }

    pub fn local_address(&self) -> &Address {
        self.conn.local_address()
    }

    pub fn remote_address(&self) -> Option<&Address> {
        self.conn.remote_address()
    }

    /// Whether the agreed mode runs the oblivious-transfer negotiation
    pub fn is_ot_mode(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.requires_ot)
    }

    // =========================================================================
    // MESSAGE PRIMITIVES
    // =========================================================================

    /// Write a header and then exactly `size` payload bytes from `payload`.
    pub async fn send_msg<R>(&mut self, msg_type: MsgType, payload: R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let header = MessageHeader::new(msg_type, size).encode();
        self.conn.write(&header[..], HEADER_LEN as u64).await?;
        self.conn.write(payload, size).await?;
        debug!("Sent {} ({} bytes)", msg_type, size);
        Ok(())
    }

    /// Send an in-memory payload.
    pub async fn send_bytes(&mut self, msg_type: MsgType, payload: &[u8]) -> Result<()> {
        self.send_msg(msg_type, payload, payload.len() as u64).await
    }

    /// Read and decode the next message header.
    pub async fn recv_msg_header(&mut self) -> Result<MessageHeader> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        self.conn.read_exact(&mut buf, HEADER_LEN as u64).await?;
        MessageHeader::decode(&buf)
    }

    /// Stream the payload announced by a header into `sink`.
    pub async fn recv_msg_payload<W>(&mut self, length: u64, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.conn.read_exact(sink, length).await
    }

    /// Read a header that must carry `msg_type` and at least `min_len` payload bytes.
    pub async fn recv_with_check(
        &mut self,
        msg_type: MsgType,
        min_len: u64,
    ) -> Result<MessageHeader> {
        let header = self.recv_msg_header().await?;
        if header.msg_type != msg_type {
            return Err(Error::protocol(format!(
                "in {}: expected {}, received {}",
                self.state, msg_type, header.msg_type
            )));
        }
        if header.length < min_len {
            return Err(Error::protocol(format!(
                "in {}: {} carries {} bytes, minimum is {}",
                self.state, msg_type, header.length, min_len
            )));
        }
        Ok(header)
    }

    /// Read a payload that is small enough to hold in memory.
    pub(crate) async fn recv_buffered(&mut self, header: &MessageHeader) -> Result<Vec<u8>> {
        if header.length > MAX_BUFFERED_PAYLOAD {
            return Err(Error::framing(format!(
                "{} declares {} bytes, limit is {}",
                header.msg_type, header.length, MAX_BUFFERED_PAYLOAD
            )));
        }
        let mut buf = Vec::with_capacity(header.length as usize);
        self.recv_msg_payload(header.length, &mut buf).await?;
        Ok(buf)
    }

    // =========================================================================
    // STATE BOOKKEEPING
    // =========================================================================

    pub(crate) fn expect_state(&self, allowed: NodeState, op: &str) -> Result<()> {
        if self.state != allowed {
            return Err(Error::protocol(format!(
                "{} not allowed in {} (requires {})",
                op, self.state, allowed
            )));
        }
        Ok(())
    }

    pub(crate) fn expect_role(&self, role: Role, op: &str) -> Result<()> {
        if self.role != role {
            return Err(Error::protocol(format!("{} is a {} operation", op, role)));
        }
        Ok(())
    }

    pub(crate) fn expect_established(&self, op: &str) -> Result<()> {
        if !self.state.is_established() {
            return Err(Error::protocol(format!(
                "{} requires an established session (in {})",
                op, self.state
            )));
        }
        Ok(())
    }

    pub(crate) fn transition(&mut self, next: NodeState) {
        debug!("{}: {} -> {}", self.role, self.state, next);
        self.state = next;
    }

    /// Shut the connection down. The node is unusable afterwards.
    pub async fn close(&mut self) -> Result<()> {
        let result = self.conn.close().await;
        self.transition(NodeState::Closed);
        result
    }
}
