//! Transport over turmoil's simulated TCP.
//!
//! Addresses are `host:port` with turmoil host names, e.g. `node1:5000`.
//! Listeners bind the port on all interfaces of the current host.

use async_trait::async_trait;
use cutpoint_core::transport::{Listener, Transport, TransportError};
use cutpoint_proto::Address;
use turmoil::net::{TcpListener, TcpStream};

/// Simulated transport. Must be used inside a turmoil host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

/// Simulated listener.
pub struct SimListener {
    listener: TcpListener,
}

#[async_trait]
impl Listener for SimListener {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<TcpStream, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::trace!("accepted simulated connection from {}", peer);
        Ok(stream)
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;
    type Listener = SimListener;

    async fn bind(&self, local: &Address) -> Result<SimListener, TransportError> {
        let port = local.port().ok_or_else(|| TransportError::Bind {
            address: local.clone(),
            reason: "address has no port".to_string(),
        })?;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| TransportError::Bind { address: local.clone(), reason: e.to_string() })?;
        Ok(SimListener { listener })
    }

    async fn connect(&self, to: &Address) -> Result<TcpStream, TransportError> {
        Ok(TcpStream::connect(to.as_str()).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cutpoint_core::transport::{probe, read_message, send_message};
    use cutpoint_proto::{Message, MessageTag};

    use super::*;

    #[test]
    fn message_crosses_the_simulated_network() {
        let mut sim = turmoil::Builder::new().build();

        sim.host("server", || async {
            let listener = SimTransport.bind(&Address::from("server:5000")).await?;
            let mut stream = listener.accept().await?;
            let message = read_message(&mut stream).await?;
            assert_eq!(message.map(|m| m.tag()), Some(MessageTag::Election));
            Ok(())
        });

        sim.client("client", async {
            let message = Message::Election { from: Address::from("client:5000"), from_id: 1 };
            let to = Address::from("server:5000");
            send_message(&SimTransport, &to, &message, Duration::from_secs(2)).await?;
            Ok(())
        });

        sim.run().expect("simulation");
    }

    #[test]
    fn missing_listener_is_unreachable() {
        let mut sim = turmoil::Builder::new().build();

        sim.host("idle", || async {
            std::future::pending::<()>().await;
            Ok(())
        });

        sim.client("client", async {
            let to = Address::from("idle:5000");
            let result = probe(&SimTransport, &to, Duration::from_secs(2)).await;
            assert!(result.is_err_and(|e| e.is_unreachable()));
            Ok(())
        });

        sim.run().expect("simulation");
    }
}
