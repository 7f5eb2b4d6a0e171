//! Seller side: accept loop and per-buyer exchange

use crate::config::Offer;
use crate::error::DaemonError;
use crate::{hash_file, read_nego, ExchangeSummary};
use podx_core::crypto::{keccak256, KeyPair};
use podx_core::Address;
use podx_net::{Listener, Node};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Seller daemon serving one offer
pub struct Server {
    listener: Listener,
    keypair: Arc<KeyPair>,
    offer: Arc<Offer>,
    /// Completed exchanges are reported here when set
    reports: Option<mpsc::UnboundedSender<ExchangeSummary>>,
}

impl Server {
    /// Bind the listener for `offer`.
    pub async fn bind(offer: Offer, keypair: Arc<KeyPair>) -> Result<Self, DaemonError> {
        let listener = Listener::bind(offer.listen, &keypair)
            .await?
            .with_preauth_timeout(offer.preauth_timeout);
        Ok(Self {
            listener,
            keypair,
            offer: Arc::new(offer),
            reports: None,
        })
    }

    /// Report every completed exchange on `tx`.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<ExchangeSummary>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Address buyers should dial, including the bound port
    pub fn local_address(&self) -> &Address {
        self.listener.local_address()
    }

    /// Accept buyers until the task is dropped. Each buyer gets its own task.
    pub async fn run(self) -> Result<(), DaemonError> {
        info!(
            "Serving mode {} for root {} as {}",
            self.offer.mode,
            hex::encode(self.offer.root),
            self.local_address()
        );

        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            };

            let keypair = Arc::clone(&self.keypair);
            let offer = Arc::clone(&self.offer);
            let reports = self.reports.clone();
            tokio::spawn(async move {
                let node = match Node::establish(conn, keypair).await {
                    Ok(node) => node,
                    Err(e) => {
                        warn!("Handshake failed: {}", e);
                        return;
                    }
                };
                let peer = node
                    .remote_address()
                    .map(|a| a.to_string())
                    .unwrap_or_default();

                match serve(node, &offer).await {
                    Ok(summary) => {
                        info!(
                            "Exchange {:#018x} with {} complete: {} bytes delivered",
                            summary.session.id, peer, summary.response_len
                        );
                        if let Some(tx) = reports {
                            let _ = tx.send(summary);
                        }
                    }
                    Err(e) => warn!("Exchange with {} failed: {}", peer, e),
                }
            });
        }
    }
}

/// Run the seller half of one exchange on an authenticated node.
pub async fn serve<S>(mut node: Node<S>, offer: &Offer) -> Result<ExchangeSummary, DaemonError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = node.recv_session_request().await?;
    if request.mode != offer.mode {
        return Err(DaemonError::ModeMismatch {
            requested: request.mode,
            served: offer.mode,
        });
    }
    if request.root != offer.root {
        return Err(DaemonError::RootMismatch {
            requested: hex::encode(request.root),
            served: hex::encode(offer.root),
        });
    }
    node.send_session_ack().await?;
    node.recv_session_ack().await?;
    let session = node.established_session()?;

    if session.requires_ot {
        let buyer_request = node.recv_nego_request().await?;
        let own_request = read_nego(offer.nego.as_deref()).await?;
        node.send_nego_ack_req(&keccak256(&buyer_request), &own_request).await?;
        let ack = node.recv_nego_ack().await?;
        if ack != keccak256(&own_request) {
            return Err(DaemonError::NegoAckMismatch);
        }
        debug!("Negotiated {} bytes each way", buyer_request.len());
    }

    let request_len = node.recv_tx_request(&mut tokio::io::sink()).await?;

    let digest = hash_file(&offer.response).await?;
    let file = tokio::fs::File::open(&offer.response).await?;
    let response_len = file.metadata().await?.len();
    node.send_tx_response(file, response_len).await?;

    let mut receipt = Vec::new();
    node.recv_tx_receipt(&mut receipt).await?;
    if receipt != digest {
        return Err(DaemonError::ReceiptMismatch);
    }

    node.recv_session_close().await?;
    Ok(ExchangeSummary {
        session,
        request_len,
        response_len,
        receipt: digest,
    })
}
