//! [`RemoteBus`]: a [`BusGateway`] participant connected to the registry.
//!
//! The participant owns a small multi-threaded Tokio runtime.  A reader task
//! receives deliveries and invokes the matching [`DataHandler`] on one of the
//! runtime's threads, so handlers never run on the caller's thread.  A writer
//! task serializes every outgoing packet onto the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use veipc_core::bus::{
    BusError, BusGateway, DataHandler, DataPublisher, LifecycleService, Subscription, TopicSpec,
};
use veipc_core::domain::RegistryUri;

use crate::wire::{read_packet, write_packet, BusPacket};

/// Time allowed for reaching the registry and completing the handshake.
pub const REGISTRY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type HandlerTable = Arc<Mutex<HashMap<Uuid, DataHandler>>>;

fn lock(handlers: &HandlerTable) -> MutexGuard<'_, HashMap<Uuid, DataHandler>> {
    handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A bus participant talking to a `veipc-registry` over TCP.
pub struct RemoteBus {
    participant: String,
    runtime: Option<Runtime>,
    outgoing: mpsc::UnboundedSender<BusPacket>,
    handlers: HandlerTable,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    lifecycle: LifecycleService,
}

impl RemoteBus {
    /// Connects to the registry at `uri` and registers as `participant`.
    ///
    /// Must be called from outside any Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`BusError::Connect`] if the registry cannot be reached in time.
    /// - [`BusError::Configuration`] if the registry rejects the participant
    ///   (e.g. the name is already taken).
    /// - [`BusError::Io`] if the participant runtime cannot be built.
    pub fn connect(uri: &RegistryUri, participant: &str) -> Result<Self, BusError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("{participant}-bus"))
            .enable_all()
            .build()?;

        let participant_id = Uuid::new_v4();
        let stream = runtime.block_on(handshake(uri, participant, participant_id))?;
        info!("participant {participant} connected to registry {uri}");

        let (mut rd, mut wr) = stream.into_split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<BusPacket>();
        let handlers: HandlerTable = Arc::default();
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();

        let writer_connected = Arc::clone(&connected);
        let writer_token = shutdown.clone();
        runtime.spawn(async move {
            loop {
                let packet = tokio::select! {
                    _ = writer_token.cancelled() => break,
                    packet = outgoing_rx.recv() => match packet {
                        Some(packet) => packet,
                        None => break,
                    },
                };
                if let Err(e) = write_packet(&mut wr, &packet).await {
                    warn!("registry write failed: {e}");
                    writer_connected.store(false, Ordering::Release);
                    break;
                }
            }
        });

        let reader_handlers = Arc::clone(&handlers);
        let reader_connected = Arc::clone(&connected);
        let reader_token = shutdown.clone();
        runtime.spawn(async move {
            loop {
                let packet = tokio::select! {
                    _ = reader_token.cancelled() => break,
                    packet = read_packet(&mut rd) => packet,
                };
                match packet {
                    Ok(Some(BusPacket::Deliver {
                        subscription_id,
                        data,
                    })) => {
                        // Clone out of the lock: handlers may take their time.
                        let handler = lock(&reader_handlers).get(&subscription_id).cloned();
                        match handler {
                            Some(handler) => handler(&data),
                            None => debug!("delivery for unknown subscription {subscription_id}"),
                        }
                    }
                    Ok(Some(other)) => debug!("ignoring registry packet {other:?}"),
                    Ok(None) => {
                        warn!("registry closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("registry read failed: {e}");
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::Release);
        });

        Ok(Self {
            participant: participant.to_string(),
            runtime: Some(runtime),
            outgoing,
            handlers,
            connected,
            shutdown,
            lifecycle: LifecycleService::new(participant),
        })
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// False once the registry connection has been lost.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, packet: BusPacket) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        self.outgoing.send(packet).map_err(|_| BusError::Disconnected)
    }
}

/// Dials the registry and exchanges `Hello` / `Welcome`.
async fn handshake(
    uri: &RegistryUri,
    participant: &str,
    participant_id: Uuid,
) -> Result<TcpStream, BusError> {
    let connect_error = |reason: String| BusError::Connect {
        uri: uri.to_string(),
        reason,
    };
    let mut stream = tokio::time::timeout(
        REGISTRY_CONNECT_TIMEOUT,
        TcpStream::connect(uri.socket_address()),
    )
    .await
    .map_err(|_| connect_error("timed out".into()))?
    .map_err(|e| connect_error(e.to_string()))?;
    let _ = stream.set_nodelay(true);

    let hello = BusPacket::Hello {
        participant: participant.to_string(),
        participant_id,
    };
    write_packet(&mut stream, &hello)
        .await
        .map_err(|e| connect_error(e.to_string()))?;
    let reply = tokio::time::timeout(REGISTRY_CONNECT_TIMEOUT, read_packet(&mut stream))
        .await
        .map_err(|_| connect_error("handshake timed out".into()))?
        .map_err(|e| connect_error(e.to_string()))?;
    match reply {
        Some(BusPacket::Welcome) => Ok(stream),
        Some(BusPacket::Reject { reason }) => Err(BusError::Configuration(reason)),
        other => Err(connect_error(format!("unexpected handshake reply {other:?}"))),
    }
}

impl Drop for RemoteBus {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(1));
        }
        debug!("participant {} disconnected", self.participant);
    }
}

struct RemotePublisher {
    topic: TopicSpec,
    outgoing: mpsc::UnboundedSender<BusPacket>,
    connected: Arc<AtomicBool>,
}

impl DataPublisher for RemotePublisher {
    fn publish(&self, data: &[u8]) -> Result<(), BusError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BusError::Disconnected);
        }
        self.outgoing
            .send(BusPacket::Publish {
                topic: self.topic.topic.clone(),
                media_type: self.topic.media_type.clone(),
                data: data.to_vec(),
            })
            .map_err(|_| BusError::Disconnected)
    }

    fn topic(&self) -> &TopicSpec {
        &self.topic
    }
}

impl BusGateway for RemoteBus {
    fn create_publisher(
        &self,
        name: &str,
        spec: &TopicSpec,
    ) -> Result<Box<dyn DataPublisher>, BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        debug!("publisher {name} on {spec}");
        Ok(Box::new(RemotePublisher {
            topic: spec.clone(),
            outgoing: self.outgoing.clone(),
            connected: Arc::clone(&self.connected),
        }))
    }

    fn create_subscriber(
        &self,
        name: &str,
        spec: &TopicSpec,
        handler: DataHandler,
    ) -> Result<Subscription, BusError> {
        let subscription_id = Uuid::new_v4();
        lock(&self.handlers).insert(subscription_id, handler);
        let announced = self.send(BusPacket::Subscribe {
            subscription_id,
            topic: spec.topic.clone(),
            media_type: spec.media_type.clone(),
        });
        if let Err(e) = announced {
            lock(&self.handlers).remove(&subscription_id);
            return Err(e);
        }
        debug!("subscriber {name} on {spec} ({subscription_id})");

        let handlers = Arc::clone(&self.handlers);
        let outgoing = self.outgoing.clone();
        Ok(Subscription::new(spec.clone(), move || {
            lock(&handlers).remove(&subscription_id);
            // The connection may already be gone.
            let _ = outgoing.send(BusPacket::Unsubscribe { subscription_id });
        }))
    }

    fn lifecycle(&self) -> &LifecycleService {
        &self.lifecycle
    }
}
