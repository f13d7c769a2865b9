//! In-process bus: publishers and subscribers living in the same process.
//!
//! Deliveries are queued and dispatched in publish order by one dedicated
//! thread, so handlers run off the publisher's thread exactly as they would
//! with a networked participant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BusError, BusGateway, DataHandler, DataPublisher, LifecycleService, Subscription, TopicSpec};

type SubscriberTable = HashMap<TopicSpec, Vec<(u64, DataHandler)>>;

struct Delivery {
    spec: TopicSpec,
    data: Vec<u8>,
}

/// A [`BusGateway`] whose topics only reach subscribers of the same instance.
pub struct InProcessBus {
    subscribers: Arc<RwLock<SubscriberTable>>,
    next_id: AtomicU64,
    tx: mpsc::UnboundedSender<Delivery>,
    lifecycle: LifecycleService,
}

impl InProcessBus {
    /// Creates the bus and starts its dispatcher thread.
    ///
    /// The thread exits once the bus and all of its publishers are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] if the dispatcher thread cannot be spawned.
    pub fn new(participant: impl Into<String>) -> Result<Self, BusError> {
        let participant = participant.into();
        let subscribers: Arc<RwLock<SubscriberTable>> = Arc::default();
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        let table = Arc::clone(&subscribers);
        thread::Builder::new()
            .name(format!("{participant}-dispatch"))
            .spawn(move || {
                while let Some(delivery) = rx.blocking_recv() {
                    let handlers: Vec<DataHandler> = {
                        let table = table.read().unwrap_or_else(|p| p.into_inner());
                        table
                            .get(&delivery.spec)
                            .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                            .unwrap_or_default()
                    };
                    if handlers.is_empty() {
                        debug!("no subscriber for topic {}", delivery.spec);
                    }
                    for handler in handlers {
                        handler(&delivery.data);
                    }
                }
            })?;

        Ok(Self {
            subscribers,
            next_id: AtomicU64::new(0),
            tx,
            lifecycle: LifecycleService::new(participant),
        })
    }

    /// Number of live subscriptions on `spec`.
    pub fn subscriber_count(&self, spec: &TopicSpec) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(spec)
            .map_or(0, Vec::len)
    }
}

struct InProcessPublisher {
    spec: TopicSpec,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DataPublisher for InProcessPublisher {
    fn publish(&self, data: &[u8]) -> Result<(), BusError> {
        self.tx
            .send(Delivery {
                spec: self.spec.clone(),
                data: data.to_vec(),
            })
            .map_err(|_| BusError::Disconnected)
    }

    fn topic(&self) -> &TopicSpec {
        &self.spec
    }
}

impl BusGateway for InProcessBus {
    fn create_publisher(
        &self,
        name: &str,
        spec: &TopicSpec,
    ) -> Result<Box<dyn DataPublisher>, BusError> {
        debug!("publisher {name} created on {spec}");
        Ok(Box::new(InProcessPublisher {
            spec: spec.clone(),
            tx: self.tx.clone(),
        }))
    }

    fn create_subscriber(
        &self,
        name: &str,
        spec: &TopicSpec,
        handler: DataHandler,
    ) -> Result<Subscription, BusError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(spec.clone())
            .or_default()
            .push((id, handler));
        debug!("subscriber {name} created on {spec}");

        let table = Arc::clone(&self.subscribers);
        let key = spec.clone();
        let name = name.to_string();
        Ok(Subscription::new(spec.clone(), move || {
            let mut table = table.write().unwrap_or_else(|p| p.into_inner());
            match table.get_mut(&key) {
                Some(subs) => {
                    subs.retain(|(sub_id, _)| *sub_id != id);
                    if subs.is_empty() {
                        table.remove(&key);
                    }
                    debug!("subscriber {name} removed from {key}");
                }
                None => warn!("subscriber {name} on {key} was already removed"),
            }
        }))
    }

    fn lifecycle(&self) -> &LifecycleService {
        &self.lifecycle
    }
}
