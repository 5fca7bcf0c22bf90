//! TCP accept loop attaching one connection process per peer to a hub.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::connection::NetworkConnection;
use super::protocol::NetworkProtocol;
use crate::node::{AppContext, BusHub};
use crate::types::Result;

/// Network server joining accepted connections to `hub`.
#[derive(Debug)]
pub struct NetworkServer {
    app: AppContext,
    hub: BusHub,
    listener: TcpListener,
    protocol: Arc<dyn NetworkProtocol>,
    cancel: CancellationToken,
}

impl NetworkServer {
    pub async fn bind<A: ToSocketAddrs>(
        app: &AppContext,
        hub: &BusHub,
        addr: A,
        protocol: Arc<dyn NetworkProtocol>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            app: app.clone(),
            hub: hub.clone(),
            listener,
            protocol,
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the accept loop until cancelled. Connections already joined keep
    /// running; they leave with the hub.
    pub async fn serve(&self) -> Result<()> {
        let max_connections = self.app.config().network.max_connections;
        let conn_semaphore = Arc::new(Semaphore::new(max_connections));
        tracing::info!(
            "bus server listening on {} (scheme={}, max_connections={})",
            self.local_addr()?,
            self.protocol.scheme(),
            max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("bus server shutting down");
                    break;
                }
                accept = self.listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("accept failed: {}", e);
                            continue;
                        }
                    };

                    // Backpressure when at capacity.
                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "connection from {} rejected: at max_connections ({})",
                                peer,
                                max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("set_nodelay for {} failed: {}", peer, e);
                    }

                    let connection = match NetworkConnection::new(
                        &self.app,
                        stream,
                        self.protocol.clone(),
                        peer.to_string(),
                    ) {
                        Ok(connection) => connection,
                        Err(e) => {
                            tracing::warn!("connection from {} not set up: {}", peer, e);
                            continue;
                        }
                    };
                    tracing::debug!(
                        "connection from {} (active={})",
                        peer,
                        max_connections - conn_semaphore.available_permits(),
                    );

                    let name = format!("peer-{}-{}", peer.ip(), peer.port());
                    let joined = self.hub.join(connection.node(), name);
                    let process = connection.process().clone();
                    joined.request().on_completion(move |outcome| {
                        if !outcome.is_successful() {
                            tracing::warn!("connection from {} not joined: {:?}", peer, outcome);
                            return;
                        }
                        // The slot is held until the worker exits.
                        process.join().on_completion(move |_| drop(permit));
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown of the accept loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
