//! The registry: accepts participants and routes publishes to subscribers.
//!
//! Every participant connection gets two tasks: the connection task reads
//! packets and updates the route table, a writer task drains the
//! participant's outgoing queue.  Routing never awaits; a participant whose
//! queue is full loses the delivery, the publisher is never slowed down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use veipc_core::bus::TopicSpec;

use crate::wire::{read_packet, write_packet, BusPacket};

/// Deliveries buffered per participant.
const PARTICIPANT_QUEUE: usize = 4096;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to bind registry on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

// ── Route table ───────────────────────────────────────────────────────────────

struct Participant {
    name: String,
    tx: mpsc::Sender<BusPacket>,
}

struct Route {
    participant: Uuid,
    topic: TopicSpec,
}

#[derive(Default)]
struct RouteTable {
    participants: HashMap<Uuid, Participant>,
    routes: HashMap<Uuid, Route>,
}

impl RouteTable {
    /// Registers a participant; names must be unique among live participants.
    fn join(&mut self, id: Uuid, name: &str, tx: mpsc::Sender<BusPacket>) -> Result<(), String> {
        if self.participants.values().any(|p| p.name == name) {
            return Err(format!("participant name '{name}' is already in use"));
        }
        if self.participants.contains_key(&id) {
            return Err(format!("participant id {id} is already in use"));
        }
        self.participants.insert(
            id,
            Participant {
                name: name.to_string(),
                tx,
            },
        );
        Ok(())
    }

    /// Drops the participant and every subscription it held.
    fn leave(&mut self, id: Uuid) {
        self.participants.remove(&id);
        self.routes.retain(|_, route| route.participant != id);
    }

    fn handle(&mut self, from: Uuid, packet: BusPacket) {
        match packet {
            BusPacket::Subscribe {
                subscription_id,
                topic,
                media_type,
            } => {
                let topic = TopicSpec { topic, media_type };
                debug!("subscription {subscription_id} on {topic}");
                self.routes.insert(
                    subscription_id,
                    Route {
                        participant: from,
                        topic,
                    },
                );
            }
            BusPacket::Unsubscribe { subscription_id } => {
                // Only the owner may cancel a subscription.
                if self
                    .routes
                    .get(&subscription_id)
                    .is_some_and(|r| r.participant == from)
                {
                    self.routes.remove(&subscription_id);
                }
            }
            BusPacket::Publish {
                topic,
                media_type,
                data,
            } => self.route(&TopicSpec { topic, media_type }, &data),
            other => warn!("ignoring unexpected packet from {from}: {other:?}"),
        }
    }

    fn route(&self, topic: &TopicSpec, data: &[u8]) {
        for (subscription_id, route) in &self.routes {
            if route.topic != *topic {
                continue;
            }
            let Some(participant) = self.participants.get(&route.participant) else {
                continue;
            };
            let packet = BusPacket::Deliver {
                subscription_id: *subscription_id,
                data: data.to_vec(),
            };
            match participant.tx.try_send(packet) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("queue of {} full, dropping delivery on {topic}", participant.name)
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    fn subscription_count(&self, topic: &TopicSpec) -> usize {
        self.routes.values().filter(|r| r.topic == *topic).count()
    }
}

/// Shared handle onto the route table, for inspection.
#[derive(Clone, Default)]
pub struct RegistryState(Arc<Mutex<RouteTable>>);

impl RegistryState {
    fn lock(&self) -> MutexGuard<'_, RouteTable> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn participant_count(&self) -> usize {
        self.lock().participants.len()
    }

    /// Live subscriptions matching `topic` (name and media type).
    pub fn subscription_count(&self, topic: &TopicSpec) -> usize {
        self.lock().subscription_count(topic)
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// A bound registry, ready to [`run`](Registry::run).
pub struct Registry {
    listener: TcpListener,
    state: RegistryState,
}

impl Registry {
    /// Binds the registry on `addr` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self, RegistryError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RegistryError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            state: RegistryState::default(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> RegistryState {
        self.state.clone()
    }

    /// Accepts participants until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("registry listening on {addr}");
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = self.state.clone();
                        let token = shutdown.clone();
                        tokio::spawn(async move {
                            serve_participant(stream, peer, state, token).await;
                        });
                    }
                    // Transient (e.g. out of file descriptors); keep accepting.
                    Err(e) => error!("accept error: {e}"),
                },
            }
        }
        info!("registry stopped");
    }
}

async fn serve_participant(
    stream: TcpStream,
    peer: SocketAddr,
    state: RegistryState,
    shutdown: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let (mut rd, mut wr) = stream.into_split();

    let (name, id) = match read_packet(&mut rd).await {
        Ok(Some(BusPacket::Hello {
            participant,
            participant_id,
        })) => (participant, participant_id),
        Ok(other) => {
            warn!("{peer}: expected Hello, got {other:?}");
            return;
        }
        Err(e) => {
            warn!("{peer}: handshake failed: {e}");
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(PARTICIPANT_QUEUE);
    let joined = state.lock().join(id, &name, tx);
    if let Err(reason) = joined {
        warn!("{peer}: rejecting participant: {reason}");
        let _ = write_packet(&mut wr, &BusPacket::Reject { reason }).await;
        return;
    }
    if let Err(e) = write_packet(&mut wr, &BusPacket::Welcome).await {
        warn!("{peer}: failed to welcome {name}: {e}");
        state.lock().leave(id);
        return;
    }
    info!("participant {name} joined from {peer}");

    let writer = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if let Err(e) = write_packet(&mut wr, &packet).await {
                debug!("write to participant failed: {e}");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            packet = read_packet(&mut rd) => match packet {
                Ok(Some(packet)) => {
                    state.lock().handle(id, packet);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("participant {name}: {e}");
                    break;
                }
            },
        }
    }

    // Dropping the participant's sender ends the writer task.
    state.lock().leave(id);
    if writer.await.is_err() {
        debug!("writer task for {name} aborted");
    }
    info!("participant {name} left");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str) -> TopicSpec {
        TopicSpec::data(name)
    }

    #[test]
    fn test_duplicate_participant_name_is_rejected() {
        let mut table = RouteTable::default();
        let (tx, _rx) = mpsc::channel(1);
        table.join(Uuid::new_v4(), "A", tx.clone()).unwrap();
        assert!(table.join(Uuid::new_v4(), "A", tx).is_err());
    }

    #[test]
    fn test_publish_is_routed_to_every_matching_subscription() {
        // Arrange: two participants subscribed to "t", one to "other"
        let mut table = RouteTable::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        table.join(a, "A", tx_a).unwrap();
        table.join(b, "B", tx_b).unwrap();
        let t = topic("t");
        for (owner, name) in [(a, "t"), (b, "t"), (b, "other")] {
            table.handle(
                owner,
                BusPacket::Subscribe {
                    subscription_id: Uuid::new_v4(),
                    topic: name.into(),
                    media_type: t.media_type.clone(),
                },
            );
        }

        // Act
        table.handle(
            a,
            BusPacket::Publish {
                topic: "t".into(),
                media_type: t.media_type.clone(),
                data: vec![9],
            },
        );

        // Assert: the publisher's own subscription is included
        assert!(matches!(rx_a.try_recv(), Ok(BusPacket::Deliver { ref data, .. }) if data == &[9]));
        assert!(matches!(rx_b.try_recv(), Ok(BusPacket::Deliver { .. })));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_media_type_must_match() {
        let mut table = RouteTable::default();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);
        table.join(id, "A", tx).unwrap();
        table.handle(
            id,
            BusPacket::Subscribe {
                subscription_id: Uuid::new_v4(),
                topic: "t".into(),
                media_type: "text/plain".into(),
            },
        );

        table.route(&topic("t"), &[1]);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_leave_drops_subscriptions() {
        let mut table = RouteTable::default();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(8);
        table.join(id, "A", tx).unwrap();
        table.handle(
            id,
            BusPacket::Subscribe {
                subscription_id: Uuid::new_v4(),
                topic: "t".into(),
                media_type: topic("t").media_type,
            },
        );
        assert_eq!(table.subscription_count(&topic("t")), 1);

        table.leave(id);

        assert_eq!(table.subscription_count(&topic("t")), 0);
        assert!(table.participants.is_empty());
    }

    #[test]
    fn test_unsubscribe_requires_ownership() {
        let mut table = RouteTable::default();
        let (owner, intruder) = (Uuid::new_v4(), Uuid::new_v4());
        let sub = Uuid::new_v4();
        table.handle(
            owner,
            BusPacket::Subscribe {
                subscription_id: sub,
                topic: "t".into(),
                media_type: topic("t").media_type,
            },
        );

        table.handle(intruder, BusPacket::Unsubscribe { subscription_id: sub });
        assert_eq!(table.subscription_count(&topic("t")), 1);

        table.handle(owner, BusPacket::Unsubscribe { subscription_id: sub });
        assert_eq!(table.subscription_count(&topic("t")), 0);
    }
}
