//! Bus Gateway: the publish/subscribe primitives the bridge consumes.
//!
//! The bridge never talks to a concrete middleware directly.  It holds an
//! `Arc<dyn BusGateway>` and asks it for publishers and subscriptions, so the
//! same session code runs against the in-process bus in tests and against a
//! networked participant in production.
//!
//! # Threading contract
//!
//! [`DataHandler`]s are invoked on the gateway's own delivery thread(s), never
//! on the thread that published.  Handlers must not block; the bridge only
//! enqueues a write request and returns.

pub mod in_process;
pub mod lifecycle;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::envelope::MEDIA_TYPE_DATA;

pub use in_process::InProcessBus;
pub use lifecycle::{FinalStateFuture, LifecycleService, ParticipantState};

/// Errors reported by a bus gateway.
#[derive(Debug, Error)]
pub enum BusError {
    /// The registry could not be reached.
    #[error("failed to connect to registry at {uri}: {reason}")]
    Connect { uri: String, reason: String },

    /// The participant's connection to the bus is gone.
    #[error("bus connection closed")]
    Disconnected,

    /// A lifecycle transition was requested from the wrong state.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// The participant configuration was rejected.
    #[error("bus configuration error: {0}")]
    Configuration(String),

    /// A local I/O failure inside the gateway.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Topic name plus media type; both must match for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicSpec {
    pub topic: String,
    pub media_type: String,
}

impl TopicSpec {
    /// A topic carrying raw byte data in the bus envelope.
    pub fn data(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            media_type: MEDIA_TYPE_DATA.to_string(),
        }
    }
}

impl fmt::Display for TopicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic)
    }
}

/// Callback invoked with the serialized bytes of every message on a topic.
pub type DataHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Publishing side of a topic.
pub trait DataPublisher: Send + Sync {
    /// Publishes one already-serialized message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the message cannot be handed to the bus.
    fn publish(&self, data: &[u8]) -> Result<(), BusError>;

    /// The topic this publisher is bound to.
    fn topic(&self) -> &TopicSpec;
}

/// A live subscription.  Dropping it unsubscribes.
pub struct Subscription {
    topic: TopicSpec,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when dropped.
    pub fn new(topic: TopicSpec, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topic,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn topic(&self) -> &TopicSpec {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// A participant on the publish/subscribe bus.
pub trait BusGateway: Send + Sync {
    /// Creates a publisher for `spec`.  `name` identifies the controller in logs.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the bus rejects the publisher.
    fn create_publisher(
        &self,
        name: &str,
        spec: &TopicSpec,
    ) -> Result<Box<dyn DataPublisher>, BusError>;

    /// Registers `handler` for every message published on `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the bus rejects the subscription.
    fn create_subscriber(
        &self,
        name: &str,
        spec: &TopicSpec,
        handler: DataHandler,
    ) -> Result<Subscription, BusError>;

    /// The participant's lifecycle.
    fn lifecycle(&self) -> &LifecycleService;
}
