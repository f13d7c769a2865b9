//! Echo server for the adapter's socket side.
//!
//! Accepts a single client and writes every length-prefixed frame back to it
//! unchanged, header included.  Zero-length frames are skipped.  Incoming
//! bytes are accumulated in a buffer and cut into frames with
//! [`decode_frame`], so frames split across TCP segments are handled the
//! same way as frames that arrive whole.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use veipc_core::protocol::{decode_frame, Endianness, FrameError};

use crate::hex::{format_hex, HEX_PREVIEW_LIMIT};

/// Address the echo server binds when none is given.
pub const DEFAULT_ECHO_BIND: &str = "0.0.0.0:6666";

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum EchoError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept a client: {0}")]
    Accept(#[source] std::io::Error),

    /// The client hung up in the middle of a frame.
    #[error("client closed mid-frame: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters for one client connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoStats {
    /// Frames written back.
    pub frames: u64,
    /// Bytes written back, headers included.
    pub bytes: u64,
    /// Zero-length frames that were not echoed.
    pub skipped_empty: u64,
}

pub struct EchoServer {
    listener: TcpListener,
    endianness: Endianness,
}

impl EchoServer {
    /// Binds the server on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: &str, endianness: Endianness) -> Result<Self, EchoError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EchoError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            endianness,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for one client and echoes its frames until it disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Accept`] if no client could be accepted, or the
    /// error that ended the client connection.
    pub async fn serve_one(self) -> Result<EchoStats, EchoError> {
        let (stream, peer) = self.listener.accept().await.map_err(EchoError::Accept)?;
        let _ = stream.set_nodelay(true);
        info!("client connected from {peer}");
        let stats = echo_frames(stream, self.endianness).await?;
        info!(
            "client disconnected after {} frame(s), {} byte(s)",
            stats.frames, stats.bytes
        );
        Ok(stats)
    }
}

/// Echoes frames on `stream` until the peer closes it.
///
/// # Errors
///
/// - [`EchoError::ShortRead`] if the stream ends inside a frame.
/// - [`EchoError::Io`] if reading or writing fails.
pub async fn echo_frames<S>(mut stream: S, endianness: Endianness) -> Result<EchoStats, EchoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stats = EchoStats::default();
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        // Echo everything that is already complete.
        while let Ok((frame, consumed)) = decode_frame(&buf, endianness) {
            let raw: Vec<u8> = buf.drain(..consumed).collect();
            if frame.is_empty() {
                warn!("received frame with size 0, skipping");
                stats.skipped_empty += 1;
                continue;
            }
            info!(
                "echoing {} bytes: {}",
                raw.len(),
                format_hex(&raw, HEX_PREVIEW_LIMIT)
            );
            stream.write_all(&raw).await?;
            stream.flush().await?;
            stats.frames += 1;
            stats.bytes += raw.len() as u64;
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(stats);
            }
            let expected = match decode_frame(&buf, endianness) {
                Err(FrameError::InsufficientData { needed, .. }) => needed,
                _ => buf.len(),
            };
            return Err(EchoError::ShortRead {
                expected,
                received: buf.len(),
            });
        }
        debug!("read {n} bytes");
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_frame_split_across_reads_is_echoed_whole() {
        // Arrange
        let mock = Builder::new()
            .read(&[0x03])
            .read(&[0x00, 0xAA])
            .read(&[0xBB, 0xCC])
            .write(&[0x03, 0x00, 0xAA, 0xBB, 0xCC])
            .build();

        // Act
        let stats = echo_frames(mock, Endianness::Little).await.unwrap();

        // Assert
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.bytes, 5);
    }

    #[tokio::test]
    async fn test_two_frames_in_one_read_are_echoed_in_order() {
        let mock = Builder::new()
            .read(&[0x00, 0x01, 0x11, 0x00, 0x02, 0x22, 0x33])
            .write(&[0x00, 0x01, 0x11])
            .write(&[0x00, 0x02, 0x22, 0x33])
            .build();

        let stats = echo_frames(mock, Endianness::Big).await.unwrap();

        assert_eq!(stats.frames, 2);
    }

    #[tokio::test]
    async fn test_zero_length_frame_is_skipped() {
        // Arrange: an empty frame followed by a one-byte frame
        let mock = Builder::new()
            .read(&[0x00, 0x00, 0x01, 0x00, 0x7F])
            .write(&[0x01, 0x00, 0x7F])
            .build();

        // Act
        let stats = echo_frames(mock, Endianness::Little).await.unwrap();

        // Assert
        assert_eq!(
            stats,
            EchoStats {
                frames: 1,
                bytes: 3,
                skipped_empty: 1
            }
        );
    }

    #[tokio::test]
    async fn test_clean_close_without_data() {
        let mock = Builder::new().build();
        let stats = echo_frames(mock, Endianness::Little).await.unwrap();
        assert_eq!(stats, EchoStats::default());
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_short_read() {
        let mock = Builder::new().read(&[0x04, 0x00, 0x01]).build();

        let result = echo_frames(mock, Endianness::Little).await;

        assert!(matches!(
            result,
            Err(EchoError::ShortRead {
                expected: 6,
                received: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_close_inside_header_is_short_read() {
        let mock = Builder::new().read(&[0x04]).build();

        let result = echo_frames(mock, Endianness::Little).await;

        assert!(matches!(
            result,
            Err(EchoError::ShortRead {
                expected: 2,
                received: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_server_echoes_over_loopback() {
        // Arrange
        let server = EchoServer::bind("127.0.0.1:0", Endianness::Big)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let serving = tokio::spawn(server.serve_one());
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Act
        client.write_all(&[0x00, 0x02, 0xDE, 0xAD]).await.unwrap();
        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).await.unwrap();
        drop(client);

        // Assert
        assert_eq!(echoed, [0x00, 0x02, 0xDE, 0xAD]);
        let stats = serving.await.unwrap().unwrap();
        assert_eq!(stats.frames, 1);
    }

    #[tokio::test]
    async fn test_bind_in_use_is_bind_error() {
        let first = EchoServer::bind("127.0.0.1:0", Endianness::Little)
            .await
            .unwrap();
        let addr = first.local_addr().unwrap().to_string();

        let second = EchoServer::bind(&addr, Endianness::Little).await;

        assert!(matches!(second, Err(EchoError::Bind { .. })));
    }
}
