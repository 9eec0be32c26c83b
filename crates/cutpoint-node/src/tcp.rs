//! TCP transport.
//!
//! Plain tokio sockets. Each message travels on its own connection, so there
//! is no connection state to manage here.

use std::net::SocketAddr;

use async_trait::async_trait;
use cutpoint_core::transport::{Listener, Transport, TransportError};
use cutpoint_proto::Address;
use tokio::net::{TcpListener, TcpStream};

/// Transport over real TCP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

/// Bound TCP listener.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Listener for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<TcpStream, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::trace!("accepted connection from {}", peer);
        Ok(stream)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpAcceptor;

    async fn bind(&self, local: &Address) -> Result<TcpAcceptor, TransportError> {
        let listener = TcpListener::bind(local.as_str())
            .await
            .map_err(|e| TransportError::Bind { address: local.clone(), reason: e.to_string() })?;
        Ok(TcpAcceptor { listener })
    }

    async fn connect(&self, to: &Address) -> Result<TcpStream, TransportError> {
        Ok(TcpStream::connect(to.as_str()).await?)
    }
}
