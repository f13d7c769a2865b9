//! Automatic sender: publishes random payloads and logs the replies.
//!
//! Payloads are wrapped in the bus envelope before publishing, and the
//! envelope is stripped from received messages before they are logged, so
//! the hex dumps on both sides show the same bytes the socket peer sees.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use veipc_core::bus::{BusError, BusGateway, DataPublisher, Subscription, TopicSpec};
use veipc_core::protocol::{deserialize_bytes, serialize_bytes, MAX_PAYLOAD_LEN};

use crate::hex::format_hex;

pub const DEFAULT_SENDER_NAME: &str = "VeIpcAutoSender";
/// Random payloads are published here.
pub const PUBLISH_TOPIC: &str = "toSocket";
/// Replies are logged from here.
pub const SUBSCRIBE_TOPIC: &str = "fromSocket";
pub const DEFAULT_PAYLOAD_SIZE: usize = 4;
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("payload size must be between 1 and 65535 bytes, got {0}")]
    InvalidPayloadSize(usize),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Accepts sizes that fit a single socket frame.
///
/// # Errors
///
/// Returns [`SenderError::InvalidPayloadSize`] for `0` or anything above
/// 65535.
pub fn validate_payload_size(size: usize) -> Result<usize, SenderError> {
    if size == 0 || size > MAX_PAYLOAD_LEN {
        return Err(SenderError::InvalidPayloadSize(size));
    }
    Ok(size)
}

pub fn random_payload<R: Rng + ?Sized>(rng: &mut R, size: usize) -> Vec<u8> {
    let mut payload = vec![0u8; size];
    rng.fill(&mut payload[..]);
    payload
}

pub struct AutoSender {
    publisher: Box<dyn DataPublisher>,
    _subscription: Subscription,
    payload_size: usize,
    sent: u64,
}

impl AutoSender {
    /// Creates the publisher on [`PUBLISH_TOPIC`] and a logging subscriber
    /// on [`SUBSCRIBE_TOPIC`].
    ///
    /// # Errors
    ///
    /// Returns [`SenderError`] if `payload_size` is out of range or the bus
    /// refuses either endpoint.
    pub fn new(bus: &dyn BusGateway, name: &str, payload_size: usize) -> Result<Self, SenderError> {
        let payload_size = validate_payload_size(payload_size)?;
        let publisher =
            bus.create_publisher(&format!("{name}_pub"), &TopicSpec::data(PUBLISH_TOPIC))?;
        let subscription = bus.create_subscriber(
            &format!("{name}_sub"),
            &TopicSpec::data(SUBSCRIBE_TOPIC),
            Arc::new(|data: &[u8]| match deserialize_bytes(data) {
                Ok(payload) => info!("Adapter >> AutoSender: {}", format_hex(&payload, usize::MAX)),
                Err(e) => warn!("dropping malformed message on {SUBSCRIBE_TOPIC}: {e}"),
            }),
        )?;
        Ok(Self {
            publisher,
            _subscription: subscription,
            payload_size,
            sent: 0,
        })
    }

    /// Publishes one random payload and returns it (without envelope).
    ///
    /// # Errors
    ///
    /// Returns [`SenderError::Bus`] if the publish fails.
    pub fn send_once<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Vec<u8>, SenderError> {
        let payload = random_payload(rng, self.payload_size);
        info!("AutoSender >> Adapter: {}", format_hex(&payload, usize::MAX));
        self.publisher.publish(&serialize_bytes(&payload))?;
        self.sent += 1;
        Ok(payload)
    }

    /// Payloads published so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Sends one payload every `interval` until `shutdown` is cancelled.
    ///
    /// The first payload goes out immediately.  Returns the number sent.
    ///
    /// # Errors
    ///
    /// Stops at the first failed publish.
    pub async fn run<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<u64, SenderError> {
        loop {
            self.send_once(rng)?;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        Ok(self.sent)
    }
}
