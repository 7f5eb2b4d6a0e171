//! TCP transport
//!
//! Dialing produces a buyer [`Node`]; a [`Listener`] hands out accepted
//! connections so that the slow handshake can run on the connection's own task.

use crate::connection::Connection;
use crate::node::Node;
use crate::preauth::DEFAULT_PREAUTH_TIMEOUT;
use podx_core::crypto::KeyPair;
use podx_core::{Address, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

/// Dial `remote` and authenticate it, returning a buyer node.
pub async fn dial(
    remote: Address,
    keypair: Arc<KeyPair>,
    preauth_timeout: Duration,
) -> Result<Node<TcpStream>> {
    let stream = TcpStream::connect(&remote.endpoint).await?;
    stream.set_nodelay(true)?;
    let local = Address::new(stream.local_addr()?.to_string(), keypair.identity());
    debug!("Dialed {} from {}", remote, local.endpoint);

    let conn = Connection::dialed(stream, local, remote).with_preauth_timeout(preauth_timeout);
    Node::establish(conn, keypair).await
}

/// Accepts inbound connections for a seller
pub struct Listener {
    inner: TcpListener,
    local: Address,
    preauth_timeout: Duration,
}

impl Listener {
    /// Bind to `addr`, advertising `identity` as ours.
    pub async fn bind<A: ToSocketAddrs>(addr: A, keypair: &KeyPair) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        let local = Address::new(inner.local_addr()?.to_string(), keypair.identity());
        info!("Listening on {}", local);
        Ok(Self {
            inner,
            local,
            preauth_timeout: DEFAULT_PREAUTH_TIMEOUT,
        })
    }

    /// Set the per-call deadline used during pre-auth
    pub fn with_preauth_timeout(mut self, deadline: Duration) -> Self {
        self.preauth_timeout = deadline;
        self
    }

    /// Our address, including the bound port
    pub fn local_address(&self) -> &Address {
        &self.local
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept the next TCP connection without authenticating it yet.
    ///
    /// Pass the result to [`Node::establish`].
    pub async fn accept(&self) -> Result<Connection<TcpStream>> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        debug!("Accepted TCP connection from {}", peer);
        Ok(Connection::accepted(stream, self.local.clone(), peer.to_string())
            .with_preauth_timeout(self.preauth_timeout))
    }
}
