//! Socket Endpoint: one TCP connection speaking length-prefixed frames.
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Closing -> Disconnected
//! ```
//!
//! The state lives in an [`EndpointStatus`] that is shared with the bus-side
//! handler of the owning session.  The handler only *reads* it to decide
//! whether a message can be queued; every socket operation happens on the
//! I/O worker thread.
//!
//! # Reading frames from a stream
//!
//! TCP may deliver a frame in arbitrary chunks.  [`FrameReader::read_frame`]
//! keeps reading until exactly the header, then exactly the payload, has
//! arrived, so the chunking of the transport never leaks into the frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use veipc_core::domain::SocketRole;
use veipc_core::protocol::{decode_header, Endianness, Frame, HEADER_SIZE};

/// Errors raised by a socket endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Dialing the remote failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Dialing the remote did not complete in time.
    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting the inbound connection failed.
    #[error("failed to accept a connection on {addr}: {source}")]
    Accept {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the connection in the middle of a frame.
    #[error("short read: peer closed after {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },

    /// The peer closed the connection between two frames.
    #[error("connection closed by peer")]
    PeerClosed,

    /// Reading from the socket failed.
    #[error("socket read failed: {0}")]
    Read(#[source] std::io::Error),

    /// Writing to the socket failed (e.g. broken pipe).
    #[error("socket write failed: {0}")]
    Write(#[source] std::io::Error),
}

impl EndpointError {
    /// True for failures that happen while opening the endpoint.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::ConnectTimeout { .. } | Self::Bind { .. } | Self::Accept { .. }
        )
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Lifecycle state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndpointState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
}

impl EndpointState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Disconnected,
        }
    }
}

/// Shared, lock-free view of an endpoint's state.
///
/// Cloning yields another handle to the same state.
#[derive(Debug, Clone)]
pub struct EndpointStatus(Arc<AtomicU8>);

impl Default for EndpointStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointStatus {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(EndpointState::Disconnected as u8)))
    }

    pub fn get(&self) -> EndpointState {
        EndpointState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.get() == EndpointState::Connected
    }

    pub(crate) fn set(&self, state: EndpointState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Performs `from -> to` only if the current state is `from`.
    fn transition(&self, from: EndpointState, to: EndpointState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Control handle for closing an endpoint from anywhere.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    status: EndpointStatus,
    closed: CancellationToken,
}

impl EndpointHandle {
    pub(crate) fn new(status: EndpointStatus, closed: CancellationToken) -> Self {
        Self { status, closed }
    }

    /// Cancels pending reads and writes.
    ///
    /// Idempotent: only the first call moves `Connected -> Closing`; the owner
    /// of the socket halves finishes the transition to `Disconnected` once it
    /// has released them.
    pub fn close(&self) {
        if self
            .status
            .transition(EndpointState::Connected, EndpointState::Closing)
        {
            debug!("endpoint closing");
        }
        self.closed.cancel();
    }

    /// Resolves once [`close`](Self::close) was called or the parent token
    /// was cancelled.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn status(&self) -> &EndpointStatus {
        &self.status
    }
}

// ── Frame I/O ─────────────────────────────────────────────────────────────────

/// Reads as many bytes as fit in `buf`, stopping early only at EOF.
///
/// Returns the number of bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
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

/// Reading half of an endpoint.
pub struct FrameReader<R> {
    inner: R,
    endianness: Endianness,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, endianness: Endianness) -> Self {
        Self { inner, endianness }
    }

    /// Reads exactly one frame.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::PeerClosed`] if the stream ends before the first
    ///   header byte.
    /// - [`EndpointError::ShortRead`] if it ends inside a header or payload.
    /// - [`EndpointError::Read`] on any other I/O failure.
    pub async fn read_frame(&mut self) -> Result<Frame, EndpointError> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header)
            .await
            .map_err(EndpointError::Read)?;
        match got {
            0 => return Err(EndpointError::PeerClosed),
            n if n < HEADER_SIZE => {
                return Err(EndpointError::ShortRead {
                    expected: HEADER_SIZE,
                    received: n,
                })
            }
            _ => {}
        }

        let length = decode_header(header, self.endianness) as usize;
        let mut payload = vec![0u8; length];
        let got = read_full(&mut self.inner, &mut payload)
            .await
            .map_err(EndpointError::Read)?;
        if got < length {
            return Err(EndpointError::ShortRead {
                expected: length,
                received: got,
            });
        }

        // A 2-byte header cannot describe an oversized payload.
        Frame::new(payload).map_err(|e| {
            EndpointError::Read(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

/// Writing half of an endpoint.
pub struct FrameWriter<W> {
    inner: W,
    endianness: Endianness,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, endianness: Endianness) -> Self {
        Self { inner, endianness }
    }

    /// Writes header and payload as one buffer.
    ///
    /// `write_all` retries partial writes until everything is sent.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Write`] if the connection breaks.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), EndpointError> {
        let bytes = frame.encode(self.endianness);
        self.inner
            .write_all(&bytes)
            .await
            .map_err(EndpointError::Write)?;
        self.inner.flush().await.map_err(EndpointError::Write)
    }

    /// Half-closes the write direction.  Errors are ignored: the peer may
    /// already be gone.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            debug!("socket shutdown: {e}");
        }
    }
}

// ── TCP endpoint ──────────────────────────────────────────────────────────────

/// A bound listening socket waiting for its single peer.
pub struct EndpointListener {
    listener: TcpListener,
    addr: String,
}

impl EndpointListener {
    /// Binds `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Bind`] (e.g. address in use).
    pub async fn bind(addr: &str) -> Result<Self, EndpointError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EndpointError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            addr: addr.to_string(),
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts exactly one connection; the listener is closed afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Accept`] if accepting fails.
    pub async fn accept(
        self,
        endianness: Endianness,
        status: EndpointStatus,
        parent: &CancellationToken,
    ) -> Result<SocketEndpoint, EndpointError> {
        status.set(EndpointState::Connecting);
        info!("waiting for a connection on {}", self.addr);
        match self.listener.accept().await {
            Ok((stream, peer)) => {
                info!("accepted connection from {peer} on {}", self.addr);
                Ok(SocketEndpoint::connected(stream, peer, endianness, status, parent))
            }
            Err(source) => {
                status.set(EndpointState::Disconnected);
                Err(EndpointError::Accept {
                    addr: self.addr,
                    source,
                })
            }
        }
    }
}

/// An open TCP connection, ready to be split into frame reader and writer.
pub struct SocketEndpoint {
    stream: TcpStream,
    peer: SocketAddr,
    endianness: Endianness,
    handle: EndpointHandle,
}

impl SocketEndpoint {
    /// Opens the endpoint for `role` at `addr`.
    ///
    /// `status` is moved to `Connecting` and then to `Connected` on success,
    /// or back to `Disconnected` on failure.  The endpoint's close token is a
    /// child of `parent`, so cancelling `parent` closes it.
    ///
    /// # Errors
    ///
    /// Returns a connect-class [`EndpointError`] (see
    /// [`EndpointError::is_connect_error`]).
    pub async fn open(
        role: SocketRole,
        addr: &str,
        endianness: Endianness,
        connect_timeout: Duration,
        status: EndpointStatus,
        parent: &CancellationToken,
    ) -> Result<Self, EndpointError> {
        match role {
            SocketRole::Listen => {
                let listener = EndpointListener::bind(addr).await?;
                listener.accept(endianness, status, parent).await
            }
            SocketRole::Connect => {
                status.set(EndpointState::Connecting);
                debug!("connecting to {addr}");
                let result = tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await;
                let stream = match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(source)) => {
                        status.set(EndpointState::Disconnected);
                        return Err(EndpointError::Connect {
                            addr: addr.to_string(),
                            source,
                        });
                    }
                    Err(_) => {
                        status.set(EndpointState::Disconnected);
                        return Err(EndpointError::ConnectTimeout {
                            addr: addr.to_string(),
                            timeout: connect_timeout,
                        });
                    }
                };
                let peer = stream.peer_addr().map_err(|source| EndpointError::Connect {
                    addr: addr.to_string(),
                    source,
                })?;
                info!("connected to {peer}");
                Ok(Self::connected(stream, peer, endianness, status, parent))
            }
        }
    }

    fn connected(
        stream: TcpStream,
        peer: SocketAddr,
        endianness: Endianness,
        status: EndpointStatus,
        parent: &CancellationToken,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("could not disable Nagle on {peer}: {e}");
        }
        status.set(EndpointState::Connected);
        Self {
            stream,
            peer,
            endianness,
            handle: EndpointHandle::new(status, parent.child_token()),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn handle(&self) -> EndpointHandle {
        self.handle.clone()
    }

    /// Splits into independently owned reader and writer halves.
    pub fn into_split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        let (read_half, write_half) = self.stream.into_split();
        (
            FrameReader::new(read_half, self.endianness),
            FrameWriter::new(write_half, self.endianness),
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_frame_reassembles_chunked_delivery() {
        // Arrange: two frames delivered in awkward chunks, splitting both the
        // header and the payload across reads
        let mock = Builder::new()
            .read(&[0x03])
            .read(&[0x00, 0xAA])
            .read(&[0xBB, 0xCC, 0x01])
            .read(&[0x00])
            .read(&[0xDD])
            .build();
        let mut reader = FrameReader::new(mock, Endianness::Little);

        // Act
        let first = reader.read_frame().await.unwrap();
        let second = reader.read_frame().await.unwrap();

        // Assert
        assert_eq!(first.payload(), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(second.payload(), &[0xDD]);
    }

    #[tokio::test]
    async fn test_read_frame_honours_big_endian_header() {
        let mock = Builder::new().read(&[0x00, 0x02, 0xDE, 0xAD]).build();
        let mut reader = FrameReader::new(mock, Endianness::Big);
        assert_eq!(reader.read_frame().await.unwrap().payload(), &[0xDE, 0xAD]);
    }

    #[tokio::test]
    async fn test_read_frame_yields_zero_length_frame() {
        let mock = Builder::new().read(&[0x00, 0x00]).build();
        let mut reader = FrameReader::new(mock, Endianness::Little);
        assert!(reader.read_frame().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_eof_at_frame_boundary_is_peer_closed() {
        let mock = Builder::new().build();
        let mut reader = FrameReader::new(mock, Endianness::Little);
        assert!(matches!(
            reader.read_frame().await,
            Err(EndpointError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_header_is_short_read() {
        let mock = Builder::new().read(&[0x05]).build();
        let mut reader = FrameReader::new(mock, Endianness::Little);
        assert!(matches!(
            reader.read_frame().await,
            Err(EndpointError::ShortRead {
                expected: 2,
                received: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_payload_is_short_read() {
        let mock = Builder::new().read(&[0x05, 0x00, 1, 2]).build();
        let mut reader = FrameReader::new(mock, Endianness::Little);
        assert!(matches!(
            reader.read_frame().await,
            Err(EndpointError::ShortRead {
                expected: 5,
                received: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_write_frame_sends_header_then_payload() {
        let mock = Builder::new().write(&[0x02, 0x00, 0xDE, 0xAD]).build();
        let mut writer = FrameWriter::new(mock, Endianness::Little);
        writer
            .write_frame(&Frame::new(vec![0xDE, 0xAD]).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_error_is_reported() {
        let mock = Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            ))
            .build();
        let mut writer = FrameWriter::new(mock, Endianness::Big);
        let result = writer.write_frame(&Frame::new(vec![1]).unwrap()).await;
        assert!(matches!(result, Err(EndpointError::Write(_))));
    }

    #[test]
    fn test_status_starts_disconnected() {
        let status = EndpointStatus::new();
        assert_eq!(status.get(), EndpointState::Disconnected);
        assert!(!status.is_connected());
    }

    #[test]
    fn test_close_is_idempotent() {
        // Arrange
        let status = EndpointStatus::new();
        status.set(EndpointState::Connected);
        let handle = EndpointHandle::new(status.clone(), CancellationToken::new());

        // Act
        handle.close();
        handle.close();

        // Assert: Closing until the owner releases the socket
        assert_eq!(status.get(), EndpointState::Closing);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_close_when_not_connected_keeps_state() {
        let status = EndpointStatus::new();
        let handle = EndpointHandle::new(status.clone(), CancellationToken::new());
        handle.close();
        assert_eq!(status.get(), EndpointState::Disconnected);
    }

    #[test]
    fn test_connect_errors_are_classified() {
        let err = EndpointError::ConnectTimeout {
            addr: "x:1".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_connect_error());
        assert!(!EndpointError::PeerClosed.is_connect_error());
    }

    #[tokio::test]
    async fn test_listen_and_connect_exchange_frames_over_loopback() {
        // Arrange: a listening endpoint on an ephemeral port
        let parent = CancellationToken::new();
        let listener = EndpointListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server_status = EndpointStatus::new();
        let server_status_clone = server_status.clone();
        let server_parent = parent.clone();
        let server = tokio::spawn(async move {
            listener
                .accept(Endianness::Big, server_status_clone, &server_parent)
                .await
        });

        // Act: dial it
        let client_status = EndpointStatus::new();
        let client = SocketEndpoint::open(
            SocketRole::Connect,
            &addr,
            Endianness::Big,
            Duration::from_secs(2),
            client_status.clone(),
            &parent,
        )
        .await
        .unwrap();
        let server = server.await.unwrap().unwrap();

        // Assert: both sides connected and frames flow
        assert!(client_status.is_connected());
        assert!(server_status.is_connected());
        let (_client_reader, mut client_writer) = client.into_split();
        let (mut server_reader, _server_writer) = server.into_split();
        client_writer
            .write_frame(&Frame::new(vec![1, 2, 3]).unwrap())
            .await
            .unwrap();
        assert_eq!(server_reader.read_frame().await.unwrap().payload(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Arrange: grab a free port, then close it so nothing listens there
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let status = EndpointStatus::new();

        // Act
        let result = SocketEndpoint::open(
            SocketRole::Connect,
            &addr,
            Endianness::Little,
            Duration::from_secs(2),
            status.clone(),
            &CancellationToken::new(),
        )
        .await;

        // Assert
        assert!(matches!(result, Err(ref e) if e.is_connect_error()));
        assert_eq!(status.get(), EndpointState::Disconnected);
    }

    #[tokio::test]
    async fn test_bind_in_use_is_connect_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let result = EndpointListener::bind(&addr).await;
        assert!(matches!(result, Err(EndpointError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_cancelling_parent_closes_endpoint_handle() {
        let parent = CancellationToken::new();
        let handle = EndpointHandle::new(EndpointStatus::new(), parent.child_token());
        parent.cancel();
        handle.closed().await;
        assert!(handle.is_closed());
    }
}
