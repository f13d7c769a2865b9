//! Bridge Manager: owns every session and the shared I/O thread.
//!
//! # Threads
//!
//! ```text
//! main thread            veipc-io thread (current-thread runtime)
//! ───────────            ─────────────────────────────────────────
//! start(specs) ──spawn──▶ open every socket concurrently
//!                         └─▶ spawn session.run() per connected socket
//!      ◀── oneshot ─────── report once every open has finished
//! stop()  ──cancel──────▶ sessions observe their tokens and exit
//!         ──join──────── thread exits, runtime dropped
//! ```
//!
//! The main thread never awaits; it hands work to the I/O runtime through its
//! [`Handle`] and waits on oneshot channels.  For that reason `start` and
//! `stop` must be called from outside any Tokio runtime.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use veipc_core::bus::BusError;
use veipc_core::domain::{ensure_unique, SocketSpec, SpecError};

use crate::application::bridge_session::{BridgeContext, BridgeSession, SessionEnd};
use crate::domain::BridgeOptions;
use crate::infrastructure::socket_endpoint::{
    EndpointError, EndpointState, EndpointStatus, SocketEndpoint,
};

/// Name of the single I/O worker thread.
pub const IO_THREAD_NAME: &str = "veipc-io";

/// How long `stop` waits for sessions to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by the manager.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed or duplicate socket specification.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// A socket could not be opened at startup.
    #[error("socket {label}: {source}")]
    Connect {
        label: String,
        #[source]
        source: EndpointError,
    },

    /// The bus rejected a session's publisher or subscriber.
    #[error("bus handles for {label}: {source}")]
    Bus {
        label: String,
        #[source]
        source: BusError,
    },

    /// The I/O runtime could not be created or went away.
    #[error("I/O runtime: {0}")]
    Runtime(String),

    /// `start` called after `stop`.
    #[error("bridge manager already stopped")]
    Stopped,

    /// The interrupt token was cancelled while sockets were still opening.
    #[error("startup interrupted")]
    Interrupted,
}

struct ManagedSession {
    label: String,
    status: EndpointStatus,
    task: Option<JoinHandle<SessionEnd>>,
}

enum OpenOutcome {
    Running(ManagedSession),
    Failed { label: String, source: EndpointError },
    Cancelled,
}

/// What the I/O thread hands back to `start`.
#[derive(Default)]
struct StartupReport {
    running: Vec<(usize, ManagedSession)>,
    failure: Option<BridgeError>,
    interrupted: bool,
}

/// Opens the session's socket and, once connected, spawns its bridge loop.
async fn open_session(session: BridgeSession, options: BridgeOptions) -> OpenOutcome {
    let label = session.label().to_string();
    let status = session.status();
    let token = session.token();
    let opened = tokio::select! {
        _ = token.cancelled() => return OpenOutcome::Cancelled,
        opened = SocketEndpoint::open(
            session.spec().role,
            &label,
            options.endianness,
            options.connect_timeout,
            session.status(),
            &token,
        ) => opened,
    };
    match opened {
        Ok(endpoint) => OpenOutcome::Running(ManagedSession {
            label,
            status,
            task: Some(tokio::spawn(session.run(endpoint))),
        }),
        Err(source) => OpenOutcome::Failed { label, source },
    }
}

/// Owns the set of sessions and the I/O worker thread.
pub struct BridgeManager {
    context: BridgeContext,
    runtime: Handle,
    worker: Option<thread::JoinHandle<()>>,
    worker_token: CancellationToken,
    sessions_token: CancellationToken,
    sessions: Vec<ManagedSession>,
    stopped: bool,
}

impl BridgeManager {
    /// Builds the current-thread runtime and starts the I/O worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Runtime`] if the runtime or thread cannot be
    /// created.
    pub fn new(context: BridgeContext) -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();
        let worker_token = CancellationToken::new();

        let token = worker_token.clone();
        let worker = thread::Builder::new()
            .name(IO_THREAD_NAME.to_string())
            .spawn(move || {
                debug!("I/O worker started");
                runtime.block_on(token.cancelled());
                debug!("I/O worker stopped");
            })
            .map_err(|e| BridgeError::Runtime(e.to_string()))?;

        Ok(Self {
            context,
            runtime: handle,
            worker: Some(worker),
            worker_token,
            sessions_token: CancellationToken::new(),
            sessions: Vec::new(),
            stopped: false,
        })
    }

    /// Creates one session per spec and opens every socket.
    ///
    /// Uniqueness is checked before any socket is opened.  All sockets are
    /// opened concurrently on the I/O thread, so every `listen` spec is bound
    /// while the others still wait for their peers.  Startup is fail-fast:
    /// the first open error aborts the pending opens and stops the sessions
    /// already running and the manager itself.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Spec`] for duplicates, [`BridgeError::Bus`] if the bus
    /// rejects a handle, [`BridgeError::Connect`] if a socket cannot be
    /// opened, [`BridgeError::Interrupted`] if the
    /// [`interrupt_token`](Self::interrupt_token) fired first,
    /// [`BridgeError::Stopped`] after [`stop`](Self::stop).
    pub fn start(&mut self, specs: Vec<SocketSpec>) -> Result<(), BridgeError> {
        if self.stopped {
            return Err(BridgeError::Stopped);
        }
        ensure_unique(&specs)?;

        match self.open_sessions(specs) {
            Ok(()) => {
                info!("{} session(s) running", self.sessions.len());
                Ok(())
            }
            Err(e) => {
                if matches!(e, BridgeError::Interrupted) {
                    info!("startup interrupted");
                } else {
                    error!("startup failed: {e}");
                }
                self.stop();
                Err(e)
            }
        }
    }

    fn open_sessions(&mut self, specs: Vec<SocketSpec>) -> Result<(), BridgeError> {
        let mut pending = Vec::with_capacity(specs.len());
        for spec in specs {
            let label = spec.address();
            info!("starting session {spec}");
            let session = BridgeSession::new(spec, &self.context, &self.sessions_token)
                .map_err(|source| BridgeError::Bus { label, source })?;
            pending.push(session);
        }

        let options = self.context.options.clone();
        let abort = self.sessions_token.clone();
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn(async move {
            let mut opens = JoinSet::new();
            for (index, session) in pending.into_iter().enumerate() {
                let options = options.clone();
                opens.spawn(async move { (index, open_session(session, options).await) });
            }

            let mut report = StartupReport::default();
            while let Some(joined) = opens.join_next().await {
                match joined {
                    Ok((index, OpenOutcome::Running(session))) => {
                        report.running.push((index, session))
                    }
                    Ok((_, OpenOutcome::Failed { label, source })) => {
                        abort.cancel();
                        if report.failure.is_none() {
                            report.failure = Some(BridgeError::Connect { label, source });
                        }
                    }
                    Ok((_, OpenOutcome::Cancelled)) => report.interrupted = true,
                    Err(e) => {
                        abort.cancel();
                        if report.failure.is_none() {
                            report.failure =
                                Some(BridgeError::Runtime(format!("open task failed: {e}")));
                        }
                    }
                }
            }
            report.running.sort_by_key(|(index, _)| *index);
            // The receiver only goes away if start() itself was abandoned.
            let _ = tx.send(report);
        });

        let report = rx
            .blocking_recv()
            .map_err(|_| BridgeError::Runtime("I/O worker stopped during startup".into()))?;
        // Running sessions are kept even on failure so that stop() joins them.
        self.sessions
            .extend(report.running.into_iter().map(|(_, session)| session));
        match report.failure {
            Some(e) => Err(e),
            None if report.interrupted => Err(BridgeError::Interrupted),
            None => Ok(()),
        }
    }

    /// Cancelling this token aborts a pending [`start`](Self::start) and ends
    /// every session.  Meant for a signal handler running on another thread.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.sessions_token.clone()
    }

    /// Stops every session, the I/O runtime and the worker thread.
    ///
    /// Idempotent.  In-flight inbound messages are dropped by the sessions'
    /// handlers once their endpoints leave `Connected`.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("stopping {} session(s)", self.sessions.len());
        self.sessions_token.cancel();

        let tasks: Vec<(String, JoinHandle<SessionEnd>)> = self
            .sessions
            .iter_mut()
            .filter_map(|s| s.task.take().map(|t| (s.label.clone(), t)))
            .collect();
        let (tx, rx) = oneshot::channel::<()>();
        self.runtime.spawn(async move {
            let join_all = async {
                for (label, task) in tasks {
                    match task.await {
                        Ok(end) => debug!("{label}: joined ({end})"),
                        Err(e) => error!("{label}: session task failed: {e}"),
                    }
                }
            };
            if tokio::time::timeout(STOP_TIMEOUT, join_all).await.is_err() {
                warn!("sessions did not stop within {STOP_TIMEOUT:?}");
            }
            let _ = tx.send(());
        });
        if rx.blocking_recv().is_err() {
            debug!("I/O worker gone before sessions were joined");
        }

        self.worker_token.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("I/O worker thread panicked");
            }
        }
        for session in &self.sessions {
            session.status.set(EndpointState::Disconnected);
        }
        info!("bridge stopped");
    }

    /// `(host:port, state)` of every started session.
    pub fn session_states(&self) -> Vec<(String, EndpointState)> {
        self.sessions
            .iter()
            .map(|s| (s.label.clone(), s.status.get()))
            .collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for BridgeManager {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
//
// Plain #[test]s: the manager blocks on its own runtime and must be driven
// from outside any async context.
