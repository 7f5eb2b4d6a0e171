//! Buyer side: one exchange against a seller

use crate::config::Purchase;
use crate::error::DaemonError;
use crate::{hash_file, read_nego, ExchangeSummary};
use podx_core::crypto::{keccak256, KeyPair};
use podx_net::dial;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Dial the seller, buy its response into `purchase.output`, and sign a receipt.
pub async fn purchase(
    purchase: &Purchase,
    keypair: Arc<KeyPair>,
) -> Result<ExchangeSummary, DaemonError> {
    let mut node = dial(purchase.peer.clone(), keypair, purchase.preauth_timeout).await?;
    info!("Connected to seller {}", purchase.peer);

    let session = node.open_session(purchase.mode, purchase.root).await?;

    if session.requires_ot {
        let own_request = read_nego(purchase.nego.as_deref()).await?;
        node.send_nego_request(&own_request).await?;
        let (ack, seller_request) = node.recv_nego_ack_req().await?;
        if ack != keccak256(&own_request) {
            return Err(DaemonError::NegoAckMismatch);
        }
        node.send_nego_ack(&keccak256(&seller_request)).await?;
        debug!("Negotiated {} bytes each way", own_request.len());
    }

    let request = tokio::fs::File::open(&purchase.request).await?;
    let request_len = request.metadata().await?.len();
    node.send_tx_request(request, request_len).await?;

    let mut output = tokio::fs::File::create(&purchase.output).await?;
    let response_len = node.recv_tx_response(&mut output).await?;
    output.flush().await?;
    drop(output);

    let receipt = hash_file(&purchase.output).await?;
    node.send_tx_receipt(&receipt[..], receipt.len() as u64).await?;
    info!(
        "Received {} bytes, receipt {}",
        response_len,
        hex::encode(receipt)
    );

    node.send_session_close().await?;
    Ok(ExchangeSummary {
        session,
        request_len,
        response_len,
        receipt,
    })
}
