//! Integration tests for session establishment over loopback TCP.
//!
//! Each test runs the seller half in a background task and the buyer half
//! inline, then checks both sides' final states.

mod common;

use common::connected_pair;
use podx_core::crypto::identity_of;
use podx_core::wire::SessionPayload;
use podx_core::{Error, Mode, MsgType, NodeState, Role};

/// Every mode establishes with both sides holding the same session.
#[tokio::test]
async fn session_established_for_every_mode() {
    for (i, mode) in Mode::ALL.into_iter().enumerate() {
        let pair = connected_pair().await;
        let mut buyer = pair.buyer;
        let mut seller = pair.seller;
        let root = [i as u8 + 1; 32];

        assert_eq!(buyer.role(), Role::Buyer);
        assert_eq!(seller.role(), Role::Seller);
        assert_eq!(buyer.state(), NodeState::Connected);

        let seller_task = tokio::spawn(async move {
            let request = seller.recv_session_request().await.unwrap();
            assert_eq!(request.id, 0);
            assert_eq!(request.mode, mode);
            assert_eq!(seller.state(), NodeState::SessionReqRecvd);

            seller.send_session_ack().await.unwrap();
            assert_eq!(seller.state(), NodeState::SessionAckWait);

            seller.recv_session_ack().await.unwrap();
            seller
        });

        let session = buyer.open_session(mode, root).await.unwrap();
        let seller = seller_task.await.unwrap();

        assert_ne!(session.id, 0);
        assert_eq!(session.mode, mode);
        assert_eq!(session.root, root);
        assert_eq!(session.requires_ot, mode.requires_ot());
        assert_eq!(buyer.state(), NodeState::SessionEstablished);
        assert_eq!(seller.state(), NodeState::SessionEstablished);
        assert_eq!(buyer.session(), seller.session());
        assert_eq!(buyer.is_ot_mode(), seller.is_ot_mode());
    }
}

/// Both sides learn each other's identity from the handshake.
#[tokio::test]
async fn handshake_binds_identities() {
    let pair = connected_pair().await;

    assert_eq!(
        identity_of(pair.buyer.remote_public_key()),
        pair.seller_key.identity()
    );
    assert_eq!(
        identity_of(pair.seller.remote_public_key()),
        pair.buyer_key.identity()
    );
    assert_eq!(
        pair.seller.remote_address().unwrap().identity,
        pair.buyer_key.identity()
    );
    assert_eq!(
        pair.buyer.remote_address(),
        Some(pair.seller.local_address())
    );
}

/// A seller ack with a different root fails the buyer and leaves it waiting.
#[tokio::test]
async fn tampered_root_in_seller_ack() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    let seller_task = tokio::spawn(async move {
        let request = seller.recv_session_request().await.unwrap();
        let tampered = SessionPayload {
            id: 42,
            root: [0xee; 32],
            ..request
        };
        seller
            .send_bytes(MsgType::SessionAck, &tampered.encode())
            .await
            .unwrap();
        seller
    });

    buyer
        .send_session_request(Mode::PlainComplaint, [1; 32])
        .await
        .unwrap();
    let err = buyer.recv_session_ack().await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(buyer.state(), NodeState::SessionAckWait);
    assert!(buyer.session().is_none());
    seller_task.await.unwrap();
}

/// A seller ack with a different mode fails the buyer.
#[tokio::test]
async fn tampered_mode_in_seller_ack() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    let seller_task = tokio::spawn(async move {
        let request = seller.recv_session_request().await.unwrap();
        let tampered = SessionPayload {
            id: 42,
            mode: Mode::TableOtAtomicSwap,
            ..request
        };
        seller
            .send_bytes(MsgType::SessionAck, &tampered.encode())
            .await
            .unwrap();
    });

    buyer
        .send_session_request(Mode::PlainComplaint, [1; 32])
        .await
        .unwrap();
    let err = buyer.recv_session_ack().await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(buyer.state(), NodeState::SessionAckWait);
    seller_task.await.unwrap();
}

/// A confirming ack that changes the root fails the seller.
#[tokio::test]
async fn tampered_root_in_buyer_confirmation() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    let seller_task = tokio::spawn(async move {
        seller.recv_session_request().await.unwrap();
        seller.send_session_ack().await.unwrap();
        let err = seller.recv_session_ack().await.unwrap_err();
        (seller, err)
    });

    buyer
        .send_session_request(Mode::TableComplaint, [3; 32])
        .await
        .unwrap();
    let ack = buyer.recv_session_ack().await.unwrap();
    let tampered = SessionPayload {
        root: [4; 32],
        ..ack
    };
    buyer
        .send_bytes(MsgType::SessionAck, &tampered.encode())
        .await
        .unwrap();

    let (seller, err) = seller_task.await.unwrap();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(seller.state(), NodeState::SessionAckWait);
    assert!(seller.session().is_none());
}

/// A confirming ack that does not echo the assigned id fails the seller.
#[tokio::test]
async fn buyer_must_echo_session_id() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    let seller_task = tokio::spawn(async move {
        seller.recv_session_request().await.unwrap();
        seller.send_session_ack().await.unwrap();
        let err = seller.recv_session_ack().await.unwrap_err();
        (seller, err)
    });

    buyer
        .send_session_request(Mode::PlainAtomicSwap, [5; 32])
        .await
        .unwrap();
    let ack = buyer.recv_session_ack().await.unwrap();
    let wrong_id = SessionPayload {
        id: ack.id.wrapping_add(1),
        ..ack
    };
    buyer
        .send_bytes(MsgType::SessionAck, &wrong_id.encode())
        .await
        .unwrap();

    let (seller, err) = seller_task.await.unwrap();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(seller.state(), NodeState::SessionAckWait);
}

/// A buyer may not choose the session id.
#[tokio::test]
async fn buyer_proposed_id_rejected() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    let proposal = SessionPayload {
        id: 7,
        mode: Mode::PlainComplaint,
        root: [0; 32],
    };
    buyer
        .send_bytes(MsgType::SessionRequest, &proposal.encode())
        .await
        .unwrap();

    let err = seller.recv_session_request().await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(seller.state(), NodeState::Connected);
}

/// A message of the wrong type is a protocol error and does not advance state.
#[tokio::test]
async fn unexpected_message_type() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    let seller_task = tokio::spawn(async move {
        seller.recv_session_request().await.unwrap();
        seller
            .send_bytes(MsgType::TxResponse, b"not an ack")
            .await
            .unwrap();
        seller
    });

    buyer
        .send_session_request(Mode::PlainComplaint, [9; 32])
        .await
        .unwrap();
    let err = buyer.recv_session_ack().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
    assert_eq!(buyer.state(), NodeState::SessionAckWait);
    seller_task.await.unwrap();
}

/// A session message shorter than its fixed layout is a protocol error.
#[tokio::test]
async fn short_session_message() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    buyer
        .send_bytes(MsgType::SessionRequest, &[0u8; 10])
        .await
        .unwrap();
    let err = seller.recv_session_request().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
    assert_eq!(seller.state(), NodeState::Connected);
}

/// Operations outside their state or role are rejected locally.
#[tokio::test]
async fn operations_guarded_by_state_and_role() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    assert!(matches!(
        seller.send_session_request(Mode::PlainComplaint, [0; 32]).await,
        Err(Error::Protocol(_))
    ));
    assert!(matches!(buyer.recv_session_request().await, Err(Error::Protocol(_))));
    assert!(matches!(buyer.send_session_ack().await, Err(Error::Protocol(_))));
    assert!(matches!(
        buyer.send_tx_request(&b"early"[..], 5).await,
        Err(Error::Protocol(_))
    ));
    assert!(matches!(buyer.send_session_close().await, Err(Error::Protocol(_))));
    assert_eq!(buyer.state(), NodeState::Connected);
    assert_eq!(seller.state(), NodeState::Connected);
}

/// Either side may close an established session.
#[tokio::test]
async fn orderly_close() {
    let pair = connected_pair().await;
    let mut buyer = pair.buyer;
    let mut seller = pair.seller;

    let seller_task = tokio::spawn(async move {
        seller.recv_session_request().await.unwrap();
        seller.send_session_ack().await.unwrap();
        seller.recv_session_ack().await.unwrap();
        seller.recv_session_close().await.unwrap();
        seller
    });

    buyer.open_session(Mode::PlainComplaint, [2; 32]).await.unwrap();
    buyer.send_session_close().await.unwrap();
    assert_eq!(buyer.state(), NodeState::Closed);

    let seller = seller_task.await.unwrap();
    assert_eq!(seller.state(), NodeState::Closed);

    assert!(matches!(buyer.send_session_close().await, Err(Error::Protocol(_))));
}
