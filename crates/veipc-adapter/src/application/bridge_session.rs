//! Bridge Session: one socket coupled to one `toTopic`/`fromTopic` pair.
//!
//! # Data flow
//!
//! ```text
//!              read loop (I/O thread)
//!   socket ──▶ FrameReader ──▶ serialize_bytes ──▶ publisher(toTopic)
//!
//!              bus thread                       write loop (I/O thread)
//!   fromTopic ──▶ inbound handler ──▶ queue ──▶ FrameWriter ──▶ socket
//! ```
//!
//! The inbound handler never touches the socket.  It validates the message,
//! checks the shared [`EndpointStatus`] and hands the frame to the session's
//! bounded queue with `try_send`, so a slow socket can never block the bus.
//! Only the write loop, running on the I/O thread, writes to the socket.
//!
//! # Teardown
//!
//! A session ends when the peer closes, a read or write fails, a publish
//! fails, or its cancellation token fires.  Only this session is affected;
//! siblings keep running.  With [`ReconnectPolicy::Retry`] the socket is
//! re-opened instead and the bus handles are kept.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use veipc_core::bus::{BusError, BusGateway, DataHandler, DataPublisher, Subscription, TopicSpec};
use veipc_core::domain::SocketSpec;
use veipc_core::protocol::{deserialize_bytes, serialize_bytes, Frame};

use crate::domain::{BridgeOptions, ReconnectPolicy};
use crate::infrastructure::socket_endpoint::{
    EndpointError, EndpointHandle, EndpointState, EndpointStatus, FrameReader, FrameWriter,
    SocketEndpoint,
};

/// Everything a session needs from its environment, passed explicitly.
#[derive(Clone)]
pub struct BridgeContext {
    pub bus: Arc<dyn BusGateway>,
    /// Prefix for publisher and subscriber names.
    pub participant_name: String,
    pub options: BridgeOptions,
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("participant_name", &self.participant_name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Why a session stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// Stopped from outside (manager shutdown).
    Cancelled,
    /// The peer closed the connection between two frames.
    PeerClosed,
    /// A socket fault: short read, read or write error, failed reconnect.
    Failed(EndpointError),
    /// The bus refused a publish.
    PublishFailed(BusError),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::PeerClosed => f.write_str("connection closed by peer"),
            Self::Failed(e) => write!(f, "socket fault: {e}"),
            Self::PublishFailed(e) => write!(f, "publish failed: {e}"),
        }
    }
}

/// One socket ↔ topic-pair bridge.
pub struct BridgeSession {
    spec: SocketSpec,
    label: String,
    options: BridgeOptions,
    publisher: Box<dyn DataPublisher>,
    // Held for its Drop: unsubscribes when the session goes away.
    _subscription: Subscription,
    outbound_rx: mpsc::Receiver<Frame>,
    status: EndpointStatus,
    token: CancellationToken,
}

impl BridgeSession {
    /// Creates the publisher on `to_topic` and the subscriber on `from_topic`.
    ///
    /// The socket is opened separately (see [`SocketEndpoint::open`]) using
    /// [`status`](Self::status) and [`token`](Self::token), then handed to
    /// [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the bus rejects either handle.
    pub fn new(
        spec: SocketSpec,
        context: &BridgeContext,
        parent: &CancellationToken,
    ) -> Result<Self, BusError> {
        let label = spec.address();
        let options = context.options.clone();
        let status = EndpointStatus::new();
        let (tx, outbound_rx) = mpsc::channel(options.queue_capacity.max(1));

        let publisher = context.bus.create_publisher(
            &format!("{}/{label}/pub", context.participant_name),
            &TopicSpec::data(spec.to_topic.clone()),
        )?;
        let handler = inbound_handler(
            label.clone(),
            status.clone(),
            tx,
            options.forward_empty_frames,
        );
        let subscription = context.bus.create_subscriber(
            &format!("{}/{label}/sub", context.participant_name),
            &TopicSpec::data(spec.from_topic.clone()),
            handler,
        )?;
        debug!("{label}: bus handles ready for {spec}");

        Ok(Self {
            spec,
            label,
            options,
            publisher,
            _subscription: subscription,
            outbound_rx,
            status,
            token: parent.child_token(),
        })
    }

    /// `host:port` of the socket.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn spec(&self) -> &SocketSpec {
        &self.spec
    }

    /// The endpoint state shared with the inbound handler.
    pub fn status(&self) -> EndpointStatus {
        self.status.clone()
    }

    /// Cancelling this token stops the session.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Pumps frames until the session ends, reconnecting per policy.
    pub async fn run(mut self, endpoint: SocketEndpoint) -> SessionEnd {
        let mut endpoint = endpoint;
        loop {
            let handle = endpoint.handle();
            let (reader, writer) = endpoint.into_split();
            let end = self.pump(reader, writer, &handle).await;

            let (interval, max_attempts) = match (&end, self.options.reconnect) {
                (SessionEnd::PeerClosed | SessionEnd::Failed(_), ReconnectPolicy::Retry { interval, max_attempts }) => {
                    (interval, max_attempts)
                }
                _ => {
                    self.log_end(&end);
                    return end;
                }
            };

            warn!("{}: {end}; reconnecting", self.label);
            match self.reconnect(interval, max_attempts).await {
                Ok(next) => endpoint = next,
                Err(end) => {
                    self.log_end(&end);
                    return end;
                }
            }
        }
    }

    fn log_end(&self, end: &SessionEnd) {
        match end {
            SessionEnd::Cancelled | SessionEnd::PeerClosed => {
                info!("{}: session ended: {end}", self.label)
            }
            SessionEnd::Failed(_) | SessionEnd::PublishFailed(_) => {
                warn!("{}: session ended: {end}", self.label)
            }
        }
    }

    /// Re-opens the socket every `interval`.
    ///
    /// Returns the session end to report when cancelled or out of attempts.
    async fn reconnect(
        &mut self,
        interval: Duration,
        max_attempts: Option<u32>,
    ) -> Result<SocketEndpoint, SessionEnd> {
        // Frames queued for the old connection are stale.
        while self.outbound_rx.try_recv().is_ok() {}

        let address = self.spec.address();
        let mut attempts: u32 = 0;
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return Err(SessionEnd::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
            attempts += 1;
            let opened = tokio::select! {
                _ = self.token.cancelled() => return Err(SessionEnd::Cancelled),
                opened = SocketEndpoint::open(
                    self.spec.role,
                    &address,
                    self.options.endianness,
                    self.options.connect_timeout,
                    self.status.clone(),
                    &self.token,
                ) => opened,
            };
            match opened {
                Ok(endpoint) => {
                    info!("{}: reconnected after {attempts} attempt(s)", self.label);
                    return Ok(endpoint);
                }
                Err(e) => {
                    if max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(SessionEnd::Failed(e));
                    }
                    debug!("{}: reconnect attempt {attempts} failed: {e}", self.label);
                }
            }
        }
    }

    /// Moves frames in both directions over one connection.
    ///
    /// Each direction is a whole loop; `select!` only ever drops a loop at
    /// session end, so no partially read frame is lost to cancellation.
    pub(crate) async fn pump<R, W>(
        &mut self,
        mut reader: FrameReader<R>,
        mut writer: FrameWriter<W>,
        handle: &EndpointHandle,
    ) -> SessionEnd
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let label = self.label.as_str();
        let forward_empty = self.options.forward_empty_frames;
        let publisher: &dyn DataPublisher = &*self.publisher;
        let outbound_rx = &mut self.outbound_rx;
        let writer_ref = &mut writer;

        let read_loop = async move {
            loop {
                let frame = match reader.read_frame().await {
                    Ok(frame) => frame,
                    Err(EndpointError::PeerClosed) => return SessionEnd::PeerClosed,
                    Err(e) => return SessionEnd::Failed(e),
                };
                if frame.is_empty() && !forward_empty {
                    debug!("{label}: skipping empty frame");
                    continue;
                }
                debug!("{label}: socket -> bus, {} bytes", frame.len());
                if let Err(e) = publisher.publish(&serialize_bytes(frame.payload())) {
                    return SessionEnd::PublishFailed(e);
                }
            }
        };

        let write_loop = async move {
            while let Some(frame) = outbound_rx.recv().await {
                debug!("{label}: bus -> socket, {} bytes", frame.len());
                if let Err(e) = writer_ref.write_frame(&frame).await {
                    return SessionEnd::Failed(e);
                }
            }
            SessionEnd::Cancelled
        };

        let end = tokio::select! {
            _ = handle.closed() => SessionEnd::Cancelled,
            end = read_loop => end,
            end = write_loop => end,
        };

        handle.close();
        writer.shutdown().await;
        self.status.set(EndpointState::Disconnected);
        end
    }
}

/// Builds the handler registered on `fromTopic`.
///
/// Runs on the bus's thread: it must not block and must not touch the socket.
fn inbound_handler(
    label: String,
    status: EndpointStatus,
    tx: mpsc::Sender<Frame>,
    forward_empty: bool,
) -> DataHandler {
    Arc::new(move |data: &[u8]| {
        if !status.is_connected() {
            warn!("{label}: socket not connected, dropping {} byte message", data.len());
            return;
        }
        let payload = match deserialize_bytes(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{label}: dropping malformed bus message: {e}");
                return;
            }
        };
        if payload.is_empty() && !forward_empty {
            debug!("{label}: skipping empty bus message");
            return;
        }
        let frame = match Frame::new(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{label}: dropping bus message: {e}");
                return;
            }
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("{label}: write queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("{label}: session gone, dropping message");
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
