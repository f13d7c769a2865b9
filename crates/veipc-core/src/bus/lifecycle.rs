//! Participant lifecycle: `Created -> Running -> Stopped`.
//!
//! `start` hands back a [`FinalStateFuture`] that resolves once the
//! participant has stopped, mirroring the middleware's "final state" future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

use super::BusError;

/// Observable participant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Created,
    Running,
    Stopped,
}

struct Inner {
    state: ParticipantState,
    final_tx: Option<oneshot::Sender<ParticipantState>>,
}

/// Lifecycle bookkeeping shared by every gateway implementation.
pub struct LifecycleService {
    participant: String,
    inner: Mutex<Inner>,
}

impl LifecycleService {
    pub fn new(participant: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            inner: Mutex::new(Inner {
                state: ParticipantState::Created,
                final_tx: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ParticipantState {
        self.lock().state
    }

    /// Moves the participant to `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Lifecycle`] if the lifecycle was already started or
    /// stopped.
    pub fn start(&self) -> Result<FinalStateFuture, BusError> {
        let mut inner = self.lock();
        if inner.state != ParticipantState::Created {
            return Err(BusError::Lifecycle(format!(
                "participant {} cannot start from state {:?}",
                self.participant, inner.state
            )));
        }
        let (tx, rx) = oneshot::channel();
        inner.state = ParticipantState::Running;
        inner.final_tx = Some(tx);
        info!("participant {} running", self.participant);
        Ok(FinalStateFuture { rx })
    }

    /// Moves the participant to `Stopped` and resolves the final-state future.
    ///
    /// Calling `stop` more than once is harmless.
    pub fn stop(&self, reason: &str) {
        let mut inner = self.lock();
        if inner.state == ParticipantState::Stopped {
            debug!("participant {} already stopped", self.participant);
            return;
        }
        inner.state = ParticipantState::Stopped;
        info!("participant {} stopping: {reason}", self.participant);
        if let Some(tx) = inner.final_tx.take() {
            // Nobody waiting is fine.
            let _ = tx.send(ParticipantState::Stopped);
        }
    }
}

/// Resolves with the participant's final state.
pub struct FinalStateFuture {
    rx: oneshot::Receiver<ParticipantState>,
}

impl FinalStateFuture {
    /// Blocks the current thread until the final state is reached or
    /// `timeout` elapses.
    ///
    /// Must be called from outside any Tokio runtime (e.g. from `main`).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Lifecycle`] on timeout or if the lifecycle was
    /// dropped without stopping.
    pub fn wait_timeout(self, timeout: Duration) -> Result<ParticipantState, BusError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        rt.block_on(async move {
            tokio::time::timeout(timeout, self)
                .await
                .map_err(|_| BusError::Lifecycle("timed out waiting for final state".into()))?
        })
    }
}

impl Future for FinalStateFuture {
    type Output = Result<ParticipantState, BusError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.map_err(|_| BusError::Lifecycle("lifecycle dropped before stopping".into()))
        })
    }
}
