//! Session establishment
//!
//! ```text
//! buyer                                   seller
//!   │ SessionRequest{0, mode, root}         │
//!   ├──────────────────────────────────────►│  Connected → SessionReqRecvd
//!   │  Connected → SessionAckWait           │
//!   │         SessionAck{id, mode, root}    │
//!   │◄──────────────────────────────────────┤  SessionReqRecvd → SessionAckWait
//!   │  SessionAckWait → SessionAckRecvd     │
//!   │ SessionAck{id, mode, root}            │
//!   ├──────────────────────────────────────►│  SessionAckWait → SessionEstablished
//!   │  SessionAckRecvd → SessionEstablished │
//! ```
//!
//! Only the seller originates a non-zero id; the buyer echoes it verbatim.
//! Mode and root must be identical in all three messages.

use crate::node::Node;
use podx_core::wire::{SessionPayload, SESSION_PAYLOAD_LEN};
use podx_core::{Bytes32, Error, Mode, MsgType, NodeState, Result, Role, Session};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

impl<S> Node<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Buyer: propose a session for `mode` over the dataset committed to by `root`.
    pub async fn send_session_request(&mut self, mode: Mode, root: Bytes32) -> Result<()> {
        const OP: &str = "send_session_request";
        self.expect_role(Role::Buyer, OP)?;
        self.expect_state(NodeState::Connected, OP)?;

        let request = SessionPayload { id: 0, mode, root };
        self.send_bytes(MsgType::SessionRequest, &request.encode()).await?;
        self.pending = Some(request);
        self.transition(NodeState::SessionAckWait);
        Ok(())
    }

    /// Seller: receive the buyer's proposal.
    pub async fn recv_session_request(&mut self) -> Result<SessionPayload> {
        const OP: &str = "recv_session_request";
        self.expect_role(Role::Seller, OP)?;
        self.expect_state(NodeState::Connected, OP)?;

        let header = self
            .recv_with_check(MsgType::SessionRequest, SESSION_PAYLOAD_LEN as u64)
            .await?;
        let body = self.recv_buffered(&header).await?;
        let request = SessionPayload::decode(&body)?;
        if request.id != 0 {
            warn!("Buyer proposed session id {}", request.id);
            return Err(Error::validation(format!(
                "session request carries id {}, only the seller assigns ids",
                request.id
            )));
        }

        self.pending = Some(request);
        self.transition(NodeState::SessionReqRecvd);
        Ok(request)
    }

    /// Acknowledge the session.
    ///
    /// The seller assigns a fresh id and answers the request; the buyer
    /// confirms the seller's ack by echoing it, which establishes the session.
    pub async fn send_session_ack(&mut self) -> Result<()> {
        const OP: &str = "send_session_ack";
        match self.role {
            Role::Seller => {
                self.expect_state(NodeState::SessionReqRecvd, OP)?;
                let request = self.pending_params(OP)?;
                let ack = SessionPayload {
                    id: fresh_session_id(),
                    ..request
                };
                self.send_bytes(MsgType::SessionAck, &ack.encode()).await?;
                self.pending = Some(ack);
                self.transition(NodeState::SessionAckWait);
            }
            Role::Buyer => {
                self.expect_state(NodeState::SessionAckRecvd, OP)?;
                let ack = self.pending_params(OP)?;
                self.send_bytes(MsgType::SessionAck, &ack.encode()).await?;
                self.adopt_session(ack);
            }
        }
        Ok(())
    }

    /// Receive the peer's ack.
    ///
    /// The buyer receives the seller's id assignment; the seller receives the
    /// buyer's confirmation, which establishes the session.
    pub async fn recv_session_ack(&mut self) -> Result<SessionPayload> {
        const OP: &str = "recv_session_ack";
        self.expect_state(NodeState::SessionAckWait, OP)?;
        let sent = self.pending_params(OP)?;

        let header = self
            .recv_with_check(MsgType::SessionAck, SESSION_PAYLOAD_LEN as u64)
            .await?;
        let body = self.recv_buffered(&header).await?;
        let ack = SessionPayload::decode(&body)?;
        check_agreement(&sent, &ack)?;

        match self.role {
            Role::Buyer => {
                if ack.id == 0 {
                    warn!("Seller acked without assigning a session id");
                    return Err(Error::validation("seller ack carries session id 0"));
                }
                self.pending = Some(ack);
                self.transition(NodeState::SessionAckRecvd);
            }
            Role::Seller => {
                if ack.id != sent.id {
                    warn!("Buyer echoed session id {}, assigned {}", ack.id, sent.id);
                    return Err(Error::validation(format!(
                        "confirming ack carries id {}, assigned {}",
                        ack.id, sent.id
                    )));
                }
                self.adopt_session(ack);
            }
        }
        Ok(ack)
    }

    /// Buyer: run the full three-message establishment.
    pub async fn open_session(&mut self, mode: Mode, root: Bytes32) -> Result<Session> {
        self.send_session_request(mode, root).await?;
        self.recv_session_ack().await?;
        self.send_session_ack().await?;
        self.established_session()
    }

    /// Send `SessionClose` and shut the connection down.
    pub async fn send_session_close(&mut self) -> Result<()> {
        self.expect_established("send_session_close")?;
        self.send_bytes(MsgType::SessionClose, &[]).await?;
        self.close().await
    }

    /// Wait for the peer's `SessionClose`.
    pub async fn recv_session_close(&mut self) -> Result<()> {
        self.expect_established("recv_session_close")?;
        let header = self.recv_with_check(MsgType::SessionClose, 0).await?;
        self.recv_buffered(&header).await?;
        self.close().await
    }

    /// The agreed session; fails before establishment.
    pub fn established_session(&self) -> Result<Session> {
        self.session.ok_or_else(|| {
            Error::protocol(format!("no session established (in {})", self.state()))
        })
    }

    fn pending_params(&self, op: &str) -> Result<SessionPayload> {
        self.pending
            .ok_or_else(|| Error::protocol(format!("{}: no session parameters pending", op)))
    }

    fn adopt_session(&mut self, agreed: SessionPayload) {
        let session = Session::new(agreed.id, agreed.mode, agreed.root);
        info!(
            "Session {:#018x} established: mode {}, root {}",
            session.id,
            session.mode,
            hex::encode(&session.root[..8])
        );
        self.session = Some(session);
        self.pending = None;
        self.transition(NodeState::SessionEstablished);
    }
}

/// Mode and commitment must survive every step unchanged.
fn check_agreement(sent: &SessionPayload, received: &SessionPayload) -> Result<()> {
    if received.mode != sent.mode {
        warn!("Session mode changed: sent {}, received {}", sent.mode, received.mode);
        return Err(Error::validation(format!(
            "mode mismatch: sent {}, received {}",
            sent.mode, received.mode
        )));
    }
    if received.root != sent.root {
        warn!("Session root changed");
        return Err(Error::validation(format!(
            "root mismatch: sent {}, received {}",
            hex::encode(sent.root),
            hex::encode(received.root)
        )));
    }
    Ok(())
}

fn fresh_session_id() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}
