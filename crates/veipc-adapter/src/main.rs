//! VeIPC adapter: entry point.
//!
//! Connects to the bus registry as one participant and bridges every socket
//! given on the command line to its pair of topics.
//!
//! # Usage
//!
//! ```text
//! veipc-adapter <host>:<port>,<toTopic>,<fromTopic>... [OPTIONS]
//!
//! Options:
//!   --name <NAME>                   Participant name [default: SilKitAdapterVeIpc]
//!   --registry-uri <URI>            silkit://<host>:<port> [default: silkit://localhost:8501]
//!   --log <LEVEL>                   Trace|Debug|Warn|Info|Error|Critical|Off [default: Info]
//!   --endianness <ORDER>            big_endian|little_endian [default: little_endian]
//!   --configuration <PATH>          TOML or JSON file overriding name, registry URI, log level
//!   --role <ROLE>                   connect|listen for every socket [default: connect]
//!   --connect-timeout-ms <MS>       Dial timeout [default: 5000]
//!   --reconnect-interval-ms <MS>    Re-open dropped sockets at this interval
//!   --reconnect-attempts <N>        Give up after N failed reconnects
//!   --forward-empty-frames          Forward zero-length frames instead of skipping them
//! ```
//!
//! # Exit codes
//!
//! | Code | Meaning                                               |
//! |------|-------------------------------------------------------|
//! | 0    | Clean shutdown, `--help`, `--version`                 |
//! | 1    | Invalid arguments or socket specifications            |
//! | 2    | Configuration file unreadable or invalid              |
//! | 3    | A socket could not be opened at startup               |
//! | 4    | Bus connection failure or any other runtime fault     |

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use veipc_core::bus::{BusError, BusGateway};
use veipc_core::domain::{parse_socket_specs, RegistryUri, SocketRole, DEFAULT_REGISTRY_URI};
use veipc_core::protocol::Endianness;
use veipc_registry::RemoteBus;

use veipc_adapter::application::{BridgeContext, BridgeError, BridgeManager};
use veipc_adapter::domain::{
    AdapterConfig, BridgeOptions, ExitStatus, LogLevel, ReconnectPolicy,
    DEFAULT_PARTICIPANT_NAME,
};
use veipc_adapter::infrastructure::load_overrides;

/// How long to wait for the participant's final state after stopping.
const FINAL_STATE_TIMEOUT: Duration = Duration::from_secs(5);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Bridges length-prefixed TCP sockets to publish/subscribe topics.
#[derive(Debug, Parser)]
#[command(
    name = "veipc-adapter",
    about = "Bridges length-prefixed TCP sockets to publish/subscribe topics",
    version
)]
struct Cli {
    /// Socket to bridge: `<host>:<port>,<toTopic>,<fromTopic>`.
    ///
    /// Frames read from the socket are published on `toTopic`; messages
    /// received on `fromTopic` are written to the socket.
    #[arg(required = true, value_name = "SOCKET")]
    sockets: Vec<String>,

    /// Participant name on the bus.
    #[arg(long, default_value = DEFAULT_PARTICIPANT_NAME, env = "VEIPC_NAME")]
    name: String,

    /// Address of the bus registry.
    #[arg(long, default_value = DEFAULT_REGISTRY_URI, env = "VEIPC_REGISTRY_URI")]
    registry_uri: RegistryUri,

    /// Log level: Trace, Debug, Warn, Info, Error, Critical or Off.
    #[arg(long = "log", default_value = "Info", env = "VEIPC_LOG")]
    log: LogLevel,

    /// Byte order of the 2-byte length header.
    #[arg(long, default_value = "little_endian")]
    endianness: Endianness,

    /// Configuration file (TOML or JSON) overriding bus-connection settings.
    #[arg(long)]
    configuration: Option<PathBuf>,

    /// Whether every socket is dialed (`connect`) or accepted (`listen`).
    #[arg(long, default_value = "connect")]
    role: SocketRole,

    /// Timeout for dialing a socket, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Re-open a dropped socket every this many milliseconds.
    ///
    /// Without this flag a dropped socket ends its session.
    #[arg(long)]
    reconnect_interval_ms: Option<u64>,

    /// Give up after this many consecutive failed reconnects.
    #[arg(long, requires = "reconnect_interval_ms")]
    reconnect_attempts: Option<u32>,

    /// Forward zero-length frames instead of skipping them.
    #[arg(long)]
    forward_empty_frames: bool,
}

impl Cli {
    /// Converts the parsed arguments into an [`AdapterConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if a socket specification is malformed or two
    /// specifications share `host:port`.
    fn into_config(self) -> anyhow::Result<AdapterConfig> {
        let specs = parse_socket_specs(&self.sockets, self.role)
            .context("invalid socket specification")?;
        let reconnect = match self.reconnect_interval_ms {
            Some(ms) => ReconnectPolicy::Retry {
                interval: Duration::from_millis(ms),
                max_attempts: self.reconnect_attempts,
            },
            None => ReconnectPolicy::Never,
        };
        Ok(AdapterConfig {
            participant_name: self.name,
            registry_uri: self.registry_uri,
            log_level: self.log,
            configuration: self.configuration,
            specs,
            options: BridgeOptions {
                endianness: self.endianness,
                forward_empty_frames: self.forward_empty_frames,
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                reconnect,
                ..BridgeOptions::default()
            },
        })
    }
}

// ── Failure plumbing ──────────────────────────────────────────────────────────

/// A fatal error together with the exit code it maps to.
struct Failure {
    status: ExitStatus,
    error: anyhow::Error,
}

trait OrExit<T> {
    fn or_exit(self, status: ExitStatus) -> Result<T, Failure>;
}

impl<T, E: Into<anyhow::Error>> OrExit<T> for Result<T, E> {
    fn or_exit(self, status: ExitStatus) -> Result<T, Failure> {
        self.map_err(|e| Failure {
            status,
            error: e.into(),
        })
    }
}

fn bus_exit_status(error: &BusError) -> ExitStatus {
    match error {
        BusError::Configuration(_) => ExitStatus::ConfigurationError,
        _ => ExitStatus::RuntimeError,
    }
}

fn bridge_exit_status(error: &BridgeError) -> ExitStatus {
    match error {
        BridgeError::Spec(_) => ExitStatus::CliError,
        BridgeError::Connect { .. } => ExitStatus::SocketError,
        BridgeError::Bus { source, .. } => bus_exit_status(source),
        BridgeError::Runtime(_) | BridgeError::Stopped => ExitStatus::RuntimeError,
        // Ctrl+C while sockets were still opening.
        BridgeError::Interrupted => ExitStatus::Success,
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are printed by clap and are not failures.
            let status = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitStatus::Success,
                _ => ExitStatus::CliError,
            };
            let _ = e.print();
            return status.into();
        }
    };

    match run(cli) {
        Ok(()) => ExitStatus::Success.into(),
        Err(failure) => {
            eprintln!("veipc-adapter: {:#}", failure.error);
            failure.status.into()
        }
    }
}

fn run(cli: Cli) -> Result<(), Failure> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = cli.into_config().or_exit(ExitStatus::CliError)?;
    if let Some(path) = config.configuration.clone() {
        let overrides = load_overrides(&path)
            .with_context(|| format!("loading configuration {}", path.display()))
            .or_exit(ExitStatus::ConfigurationError)?;
        config.apply_overrides(overrides);
    }

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // RUST_LOG, when set, takes precedence over --log.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_directive())),
        )
        .init();

    info!(
        "VeIPC adapter starting: participant {}, registry {}, {} socket(s), {} header",
        config.participant_name,
        config.registry_uri,
        config.specs.len(),
        config.options.endianness
    );
    for spec in &config.specs {
        info!("  {spec}");
    }

    // ── Bus participant ───────────────────────────────────────────────────────
    let bus: Arc<dyn BusGateway> = match RemoteBus::connect(&config.registry_uri, &config.participant_name) {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            let status = bus_exit_status(&e);
            return Err(e)
                .context("connecting to the bus registry")
                .or_exit(status);
        }
    };

    // ── Bridge ────────────────────────────────────────────────────────────────
    let context = BridgeContext {
        bus: Arc::clone(&bus),
        participant_name: config.participant_name.clone(),
        options: config.options.clone(),
    };
    let mut manager = BridgeManager::new(context)
        .context("starting the I/O worker")
        .or_exit(ExitStatus::RuntimeError)?;

    // Listen for Ctrl+C before opening sockets: a listen socket may wait for
    // its peer indefinitely.
    let signal = spawn_signal_listener(manager.interrupt_token())
        .or_exit(ExitStatus::RuntimeError)?;
    info!("Press Ctrl+C to stop");
    match manager.start(config.specs) {
        Ok(()) => {}
        Err(BridgeError::Interrupted) => {
            join_signal_listener(signal).or_exit(ExitStatus::RuntimeError)?;
            info!("VeIPC adapter stopped during startup");
            return Ok(());
        }
        Err(e) => {
            let status = bridge_exit_status(&e);
            return Err(e).context("starting bridge sessions").or_exit(status);
        }
    }

    let final_state = bus
        .lifecycle()
        .start()
        .context("starting the participant lifecycle")
        .or_exit(ExitStatus::RuntimeError)?;

    let waited = join_signal_listener(signal);

    // ── Shutdown ──────────────────────────────────────────────────────────────
    manager.stop();
    bus.lifecycle().stop("user requested stop");
    match final_state.wait_timeout(FINAL_STATE_TIMEOUT) {
        Ok(state) => info!("participant final state: {state:?}"),
        Err(e) => warn!("participant did not reach its final state: {e}"),
    }
    waited.or_exit(ExitStatus::RuntimeError)?;
    info!("VeIPC adapter stopped");
    Ok(())
}

// ── Signal handling ───────────────────────────────────────────────────────────

/// Spawns a thread that cancels `interrupt` on Ctrl+C.
///
/// The token is cancelled even when the listener cannot be installed, so a
/// pending startup never waits on a signal that cannot arrive.
fn spawn_signal_listener(
    interrupt: CancellationToken,
) -> anyhow::Result<thread::JoinHandle<anyhow::Result<()>>> {
    thread::Builder::new()
        .name("veipc-signal".into())
        .spawn(move || {
            let waited = wait_for_ctrl_c();
            interrupt.cancel();
            waited
        })
        .context("spawning the signal thread")
}

/// Blocks until the signal thread has seen Ctrl+C.
fn join_signal_listener(handle: thread::JoinHandle<anyhow::Result<()>>) -> anyhow::Result<()> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("signal thread panicked"))?
}

/// Blocks until Ctrl+C.
///
/// Uses a throwaway runtime so the signal thread stays outside the bridge's
/// I/O runtime.
fn wait_for_ctrl_c() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the signal runtime")?;
    rt.block_on(tokio::signal::ctrl_c())
        .context("listening for Ctrl+C")?;
    info!("received Ctrl+C, shutting down");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
