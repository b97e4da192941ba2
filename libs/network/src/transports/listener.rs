//! Foundation-side listener
//!
//! Accepts game connections and wraps each in a host-mode [`SocketTransport`]
//! whose receive task answers the transport handshake.

use super::tcp::{SocketTransport, TransportConfig};
use super::MessageHandler;
use crate::error::{Result, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// TCP listener producing host-mode transports
#[derive(Debug)]
pub struct TransportListener {
    listener: TcpListener,
    config: TransportConfig,
}

impl TransportListener {
    /// Bind to `address`; `config` supplies the host's protocol version and limits
    pub async fn bind(address: SocketAddr, config: TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            TransportError::connection_with_source(
                "failed to bind listener",
                address.ip().to_string(),
                address.port(),
                e,
            )
        })?;
        info!(%address, version = %config.version, "Foundation listener bound");
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one game connection without an application handler
    ///
    /// Application messages that arrive before a handler is registered are
    /// dropped; use [`accept_with_handler`](Self::accept_with_handler) when
    /// the first messages matter.
    pub async fn accept(&self) -> Result<SocketTransport> {
        self.accept_inner(None).await
    }

    /// Accept one game connection, dispatching to `handler` from the first message
    pub async fn accept_with_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<SocketTransport> {
        self.accept_inner(Some(handler)).await
    }

    async fn accept_inner(&self, handler: Option<Arc<dyn MessageHandler>>) -> Result<SocketTransport> {
        let (stream, peer) = self.listener.accept().await.map_err(|e| {
            let local = self.listener.local_addr().ok();
            TransportError::connection_with_source(
                "failed to accept connection",
                local.map(|a| a.ip().to_string()).unwrap_or_default(),
                local.map(|a| a.port()).unwrap_or_default(),
                e,
            )
        })?;
        info!(%peer, "Accepted game connection");
        Ok(SocketTransport::accepted(stream, peer, self.config.clone(), handler).await)
    }
}
