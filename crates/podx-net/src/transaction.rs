//! Negotiation and transaction exchange
//!
//! Entered from `SessionEstablished`. OT modes first run a negotiation in
//! which the seller pipelines its ack and its own request into one
//! `NegoAckReq`:
//!
//! ```text
//! buyer:  SessionEstablished ─NegoRequest→ NegoAckReqWait ─NegoAckReq→ NegoAckReqRecvd ─NegoAck→ Negotiated
//! seller: SessionEstablished ─NegoRequest→ NegoRequestRecvd ─NegoAckReq→ NegoAckWait ─NegoAck→ Negotiated
//! ```
//!
//! Both branches then run the same Tx exchange:
//!
//! ```text
//! buyer:  ─TxRequest→ TxResponseWait ─TxResponse→ TxResponseRecvd ─TxReceipt→ TxSecretWait
//! seller: ─TxRequest→ TxRequestRecvd ─TxResponse→ TxReceiptWait ─TxReceipt→ TxReceiptRecvd
//! ```

use crate::node::Node;
use crate::receipt::{ReceiptSink, SigningReader};
use podx_core::crypto::{identity_of, verify_signer, SignatureBytes, SIGNATURE_LEN};
use podx_core::wire::{decode_nego_ack_req, encode_nego_ack_req};
use podx_core::{Error, MsgType, NodeState, Result, Role};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{info, warn};

/// Minimum `NegoAckReq` body: two empty length-prefixed fields
const NEGO_ACK_REQ_MIN_LEN: u64 = 16;

/// A receipt whose signature recovered to the buyer's key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifiedReceipt {
    /// Receipt body length, signature excluded
    pub length: u64,
    pub signature: SignatureBytes,
}

impl<S> Node<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // =========================================================================
    // NEGOTIATION (OT MODES)
    // =========================================================================

    /// Buyer: open the OT negotiation.
    pub async fn send_nego_request(&mut self, request: &[u8]) -> Result<()> {
        const OP: &str = "send_nego_request";
        self.expect_role(Role::Buyer, OP)?;
        self.expect_ot(OP)?;
        self.expect_state(NodeState::SessionEstablished, OP)?;

        self.send_bytes(MsgType::NegoRequest, request).await?;
        self.transition(NodeState::NegoAckReqWait);
        Ok(())
    }

    /// Seller: receive the buyer's negotiation request.
    pub async fn recv_nego_request(&mut self) -> Result<Vec<u8>> {
        const OP: &str = "recv_nego_request";
        self.expect_role(Role::Seller, OP)?;
        self.expect_ot(OP)?;
        self.expect_state(NodeState::SessionEstablished, OP)?;

        let header = self.recv_with_check(MsgType::NegoRequest, 0).await?;
        let request = self.recv_buffered(&header).await?;
        self.transition(NodeState::NegoRequestRecvd);
        Ok(request)
    }

    /// Seller: ack the buyer's request and send our own in one message.
    pub async fn send_nego_ack_req(&mut self, ack: &[u8], request: &[u8]) -> Result<()> {
        const OP: &str = "send_nego_ack_req";
        self.expect_role(Role::Seller, OP)?;
        self.expect_state(NodeState::NegoRequestRecvd, OP)?;

        let body = encode_nego_ack_req(ack, request);
        self.send_bytes(MsgType::NegoAckReq, &body).await?;
        self.transition(NodeState::NegoAckWait);
        Ok(())
    }

    /// Buyer: receive the seller's `(ack, request)` pair.
    pub async fn recv_nego_ack_req(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        const OP: &str = "recv_nego_ack_req";
        self.expect_role(Role::Buyer, OP)?;
        self.expect_state(NodeState::NegoAckReqWait, OP)?;

        let header = self
            .recv_with_check(MsgType::NegoAckReq, NEGO_ACK_REQ_MIN_LEN)
            .await?;
        let body = self.recv_buffered(&header).await?;
        let pair = decode_nego_ack_req(&body)?;
        self.transition(NodeState::NegoAckReqRecvd);
        Ok(pair)
    }

    /// Buyer: ack the seller's request, completing negotiation.
    pub async fn send_nego_ack(&mut self, ack: &[u8]) -> Result<()> {
        const OP: &str = "send_nego_ack";
        self.expect_role(Role::Buyer, OP)?;
        self.expect_state(NodeState::NegoAckReqRecvd, OP)?;

        self.send_bytes(MsgType::NegoAck, ack).await?;
        self.transition(NodeState::Negotiated);
        Ok(())
    }

    /// Seller: receive the buyer's final ack, completing negotiation.
    pub async fn recv_nego_ack(&mut self) -> Result<Vec<u8>> {
        const OP: &str = "recv_nego_ack";
        self.expect_role(Role::Seller, OP)?;
        self.expect_state(NodeState::NegoAckWait, OP)?;

        let header = self.recv_with_check(MsgType::NegoAck, 0).await?;
        let ack = self.recv_buffered(&header).await?;
        self.transition(NodeState::Negotiated);
        Ok(ack)
    }

    // =========================================================================
    // TRANSACTION
    // =========================================================================

    /// Buyer: stream `size` bytes of request from `body`.
    pub async fn send_tx_request<R>(&mut self, body: R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        const OP: &str = "send_tx_request";
        self.expect_role(Role::Buyer, OP)?;
        self.expect_state(self.tx_entry_state(), OP)?;

        self.send_msg(MsgType::TxRequest, body, size).await?;
        self.transition(NodeState::TxResponseWait);
        Ok(())
    }

    /// Seller: stream the buyer's request into `sink`, returning its length.
    pub async fn recv_tx_request<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        const OP: &str = "recv_tx_request";
        self.expect_role(Role::Seller, OP)?;
        self.expect_state(self.tx_entry_state(), OP)?;

        let header = self.recv_with_check(MsgType::TxRequest, 0).await?;
        self.recv_msg_payload(header.length, sink).await?;
        self.transition(NodeState::TxRequestRecvd);
        Ok(header.length)
    }

    /// Seller: stream `size` bytes of response from `body`.
    pub async fn send_tx_response<R>(&mut self, body: R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        const OP: &str = "send_tx_response";
        self.expect_role(Role::Seller, OP)?;
        self.expect_state(NodeState::TxRequestRecvd, OP)?;

        self.send_msg(MsgType::TxResponse, body, size).await?;
        self.transition(NodeState::TxReceiptWait);
        Ok(())
    }

    /// Buyer: stream the seller's response into `sink`, returning its length.
    pub async fn recv_tx_response<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        const OP: &str = "recv_tx_response";
        self.expect_role(Role::Buyer, OP)?;
        self.expect_state(NodeState::TxResponseWait, OP)?;

        let header = self.recv_with_check(MsgType::TxResponse, 0).await?;
        self.recv_msg_payload(header.length, sink).await?;
        self.transition(NodeState::TxResponseRecvd);
        Ok(header.length)
    }

    /// Buyer: stream `size` bytes of receipt from `receipt`, signed with our key.
    pub async fn send_tx_receipt<R>(&mut self, receipt: R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        const OP: &str = "send_tx_receipt";
        self.expect_role(Role::Buyer, OP)?;
        self.expect_state(NodeState::TxResponseRecvd, OP)?;

        let total = size.checked_add(SIGNATURE_LEN as u64).ok_or_else(|| {
            Error::framing(format!("receipt of {} bytes leaves no room for its signature", size))
        })?;
        let keypair = Arc::clone(&self.keypair);
        let signed = SigningReader::new(receipt.take(size), &keypair);
        self.send_msg(MsgType::TxReceipt, signed, total).await?;
        self.transition(NodeState::TxSecretWait);
        Ok(())
    }

    /// Seller: stream the receipt into `sink` and check it was signed by the buyer.
    pub async fn recv_tx_receipt<W>(&mut self, sink: &mut W) -> Result<VerifiedReceipt>
    where
        W: AsyncWrite + Unpin,
    {
        const OP: &str = "recv_tx_receipt";
        self.expect_role(Role::Seller, OP)?;
        self.expect_state(NodeState::TxReceiptWait, OP)?;

        let header = self
            .recv_with_check(MsgType::TxReceipt, SIGNATURE_LEN as u64)
            .await?;
        let mut split = ReceiptSink::new(sink, header.length);
        self.recv_msg_payload(header.length, &mut split).await?;
        let (digest, signature) = split.finish();

        if let Err(e) = verify_signer(&digest, &signature, &self.remote_key) {
            warn!(
                "Receipt not signed by buyer {}: {}",
                identity_of(&self.remote_key),
                e
            );
            return Err(e);
        }

        let mut sig = [0u8; SIGNATURE_LEN];
        sig.copy_from_slice(&signature);
        let receipt = VerifiedReceipt {
            length: header.length - SIGNATURE_LEN as u64,
            signature: sig,
        };
        info!("Receipt verified ({} bytes)", receipt.length);
        self.transition(NodeState::TxReceiptRecvd);
        Ok(receipt)
    }

    /// State from which the Tx exchange may start for the agreed mode
    fn tx_entry_state(&self) -> NodeState {
        if self.is_ot_mode() {
            NodeState::Negotiated
        } else {
            NodeState::SessionEstablished
        }
    }

    fn expect_ot(&self, op: &str) -> Result<()> {
        match self.session() {
            Some(session) if session.requires_ot => Ok(()),
            Some(session) => Err(Error::protocol(format!(
                "{}: mode {} does not negotiate",
                op, session.mode
            ))),
            None => Err(Error::protocol(format!(
                "{} requires an established session (in {})",
                op,
                self.state()
            ))),
        }
    }
}
