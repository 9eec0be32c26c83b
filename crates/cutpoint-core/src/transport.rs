//! Transport abstraction and framed message I/O.
//!
//! A transport only knows how to bind a listener and open a byte stream to a
//! logical address. Everything protocol-specific lives in the free functions
//! here, so TCP and the simulated network share one framing and timeout
//! policy:
//!
//! - [`send_message`]: connect, write one frame, close
//! - [`probe`]: connect and close without a frame (liveness check)
//! - [`read_message`]: read one frame, or `None` for an empty connection
//!
//! Connection attempts and writes are bounded by a timeout. Expiry or refusal
//! surfaces as [`TransportError::Unreachable`], which callers treat as a
//! "peer is down" signal rather than a fatal error.

use std::time::Duration;

use async_trait::async_trait;
use cutpoint_proto::{Address, FrameHeader, Message, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer refused the connection, timed out, or dropped mid-write.
    #[error("peer {address} unreachable: {reason}")]
    Unreachable {
        /// Peer address
        address: Address,
        /// What went wrong
        reason: String,
    },

    /// Local listener could not be bound.
    #[error("failed to bind {address}: {reason}")]
    Bind {
        /// Address we tried to bind
        address: Address,
        /// What went wrong
        reason: String,
    },

    /// I/O failure on an established connection.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer sent bytes that are not a valid frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Returns true if this error means the peer could not be reached.
    ///
    /// Failure detection treats this as evidence the peer is down.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    fn unreachable(address: &Address, reason: impl ToString) -> Self {
        Self::Unreachable { address: address.clone(), reason: reason.to_string() }
    }
}

/// Byte stream produced by a transport.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<S> Stream for S where S: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Accepts inbound connections.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Stream type yielded per connection.
    type Stream: Stream;

    /// Wait for the next inbound connection.
    async fn accept(&self) -> Result<Self::Stream, TransportError>;
}

/// Point-to-point transport between processes.
///
/// Implementations must deliver the bytes of one stream in order. No ordering
/// is required across streams.
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Stream type for both directions.
    type Stream: Stream;

    /// Listener type returned by [`Transport::bind`].
    type Listener: Listener<Stream = Self::Stream>;

    /// Start listening on `local`.
    async fn bind(&self, local: &Address) -> Result<Self::Listener, TransportError>;

    /// Open a stream to `to`. Must fail (not hang forever) when the peer is
    /// gone; callers bound it with a timeout anyway.
    async fn connect(&self, to: &Address) -> Result<Self::Stream, TransportError>;
}

/// Send one message on a fresh connection.
pub async fn send_message<T: Transport>(
    transport: &T,
    to: &Address,
    message: &Message,
    timeout: Duration,
) -> Result<(), TransportError> {
    let mut stream = connect_within(transport, to, timeout).await?;

    match tokio::time::timeout(timeout, write_message(&mut stream, message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(TransportError::Io(e))) => Err(TransportError::unreachable(to, e)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(TransportError::unreachable(to, format!("write timed out after {timeout:?}"))),
    }
}

/// Check that `to` accepts connections, without sending a frame.
pub async fn probe<T: Transport>(
    transport: &T,
    to: &Address,
    timeout: Duration,
) -> Result<(), TransportError> {
    let mut stream = connect_within(transport, to, timeout).await?;
    if let Err(e) = stream.shutdown().await {
        tracing::trace!("probe shutdown to {}: {}", to, e);
    }
    Ok(())
}

async fn connect_within<T: Transport>(
    transport: &T,
    to: &Address,
    timeout: Duration,
) -> Result<T::Stream, TransportError> {
    match tokio::time::timeout(timeout, transport.connect(to)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(TransportError::Io(e))) => Err(TransportError::unreachable(to, e)),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            Err(TransportError::unreachable(to, format!("connect timed out after {timeout:?}")))
        },
    }
}

/// Write one frame to `writer` and shut down the write half.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + Send,
{
    let frame = message.encode()?;
    writer.write_all(&frame).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Read exactly one frame from `reader`.
///
/// Returns `Ok(None)` if the peer closed without sending anything, which is
/// how liveness probes look on the receiving side.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut header = [0u8; FrameHeader::SIZE];
    let filled = read_full(reader, &mut header).await?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < header.len() {
        return Err(ProtocolError::Truncated { expected: header.len(), actual: filled }.into());
    }

    let header = FrameHeader::from_bytes(&header)?;
    let mut payload = vec![0u8; header.payload_size()];
    let filled = read_full(reader, &mut payload).await?;
    if filled < payload.len() {
        return Err(ProtocolError::Truncated {
            expected: FrameHeader::SIZE + payload.len(),
            actual: FrameHeader::SIZE + filled,
        }
        .into());
    }

    Ok(Some(Message::decode_payload(&payload)?))
}

/// Fill `buf` until it is full or the stream ends. Returns bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + Send,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use tokio::io::DuplexStream;

    use super::*;

    fn app(payload: &str) -> Message {
        Message::App { from: Address::from("a:1"), timestamp: 3, payload: payload.to_string() }
    }

    #[tokio::test]
    async fn frame_is_read_back_from_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_message(&mut client, &app("hello")).await.expect("write");
        drop(client);

        let message = read_message(&mut server).await.expect("read");
        assert_eq!(message, Some(app("hello")));
    }

    #[tokio::test]
    async fn empty_connection_is_a_probe() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let message = read_message(&mut server).await.expect("read");
        assert_eq!(message, None);
    }

    #[tokio::test]
    async fn partial_header_is_a_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"CUTP\x01").await.expect("write");
        drop(client);

        let result = read_message(&mut server).await;
        assert!(matches!(
            result,
            Err(TransportError::Protocol(ProtocolError::Truncated { expected: 12, actual: 5 }))
        ));
    }

    #[tokio::test]
    async fn partial_body_is_a_protocol_error() {
        let frame = app("partial").encode().expect("encode");
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&frame[..frame.len() - 2]).await.expect("write");
        drop(client);

        let result = read_message(&mut server).await;
        assert!(matches!(result, Err(TransportError::Protocol(ProtocolError::Truncated { .. }))));
    }

    /// Transport whose peers never answer.
    #[derive(Clone, Default)]
    struct BlackHole {
        attempts: Arc<AtomicUsize>,
    }

    struct NoListener;

    #[async_trait]
    impl Listener for NoListener {
        type Stream = DuplexStream;

        async fn accept(&self) -> Result<DuplexStream, TransportError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Transport for BlackHole {
        type Stream = DuplexStream;
        type Listener = NoListener;

        async fn bind(&self, _local: &Address) -> Result<NoListener, TransportError> {
            Ok(NoListener)
        }

        async fn connect(&self, _to: &Address) -> Result<DuplexStream, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    /// Transport whose peers refuse every connection.
    #[derive(Clone)]
    struct Refusing;

    #[async_trait]
    impl Transport for Refusing {
        type Stream = DuplexStream;
        type Listener = NoListener;

        async fn bind(&self, _local: &Address) -> Result<NoListener, TransportError> {
            Ok(NoListener)
        }

        async fn connect(&self, _to: &Address) -> Result<DuplexStream, TransportError> {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out_as_unreachable() {
        let transport = BlackHole::default();
        let to = Address::from("b:2");

        let start = tokio::time::Instant::now();
        let result = send_message(&transport, &to, &app("x"), Duration::from_secs(2)).await;

        assert!(result.as_ref().is_err_and(TransportError::is_unreachable), "{result:?}");
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let result = probe(&Refusing, &Address::from("b:2"), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::Unreachable { .. })));
    }
}
