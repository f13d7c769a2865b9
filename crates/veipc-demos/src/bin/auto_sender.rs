//! veipc-auto-sender: publishes random payloads for the adapter to forward.
//!
//! ```text
//! veipc-auto-sender [--name VeIpcAutoSender] [--registry-uri silkit://localhost:8501]
//!                   [--log Info] [--payload-size 4] [--interval-ms 2000]
//! ```
//!
//! Exit codes follow the adapter: `1` for bad arguments, `2` when the
//! registry rejects the participant, `4` for an out-of-range payload size or
//! any other failure.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use veipc_adapter::domain::{ExitStatus, LogLevel};
use veipc_core::bus::BusError;
use veipc_core::domain::{RegistryUri, DEFAULT_REGISTRY_URI};
use veipc_demos::auto_sender::{
    validate_payload_size, AutoSender, DEFAULT_PAYLOAD_SIZE, DEFAULT_SENDER_NAME,
};
use veipc_registry::RemoteBus;

/// Delay before the first payload, giving the adapter time to subscribe.
const SETUP_DELAY: Duration = Duration::from_secs(1);

/// Publishes random payloads on `toSocket` and logs replies on `fromSocket`.
#[derive(Debug, Parser)]
#[command(name = "veipc-auto-sender", version)]
struct Cli {
    /// Participant name on the bus.
    #[arg(long, default_value = DEFAULT_SENDER_NAME)]
    name: String,

    /// Address of the bus registry.
    #[arg(long, default_value = DEFAULT_REGISTRY_URI, env = "VEIPC_REGISTRY_URI")]
    registry_uri: RegistryUri,

    /// Log level: Trace, Debug, Warn, Info, Error, Critical or Off.
    #[arg(long = "log", default_value = "Info")]
    log: LogLevel,

    /// Bytes per payload (1..=65535).
    #[arg(long, default_value_t = DEFAULT_PAYLOAD_SIZE)]
    payload_size: usize,

    /// Milliseconds between payloads.
    #[arg(long, default_value_t = 2000)]
    interval_ms: u64,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let status = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitStatus::Success,
                _ => ExitStatus::CliError,
            };
            let _ = e.print();
            return status.into();
        }
    };

    if let Err(e) = validate_payload_size(cli.payload_size) {
        eprintln!("veipc-auto-sender: {e}");
        return ExitStatus::RuntimeError.into();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log.as_filter_directive())),
        )
        .init();

    // Connect before any runtime exists: RemoteBus drives its own.
    let bus = match RemoteBus::connect(&cli.registry_uri, &cli.name) {
        Ok(bus) => bus,
        Err(e) => {
            error!("connecting to the bus registry: {e}");
            return match e {
                BusError::Configuration(_) => ExitStatus::ConfigurationError,
                _ => ExitStatus::RuntimeError,
            }
            .into();
        }
    };

    match run(&bus, &cli) {
        Ok(sent) => {
            info!("stopped after {sent} payload(s)");
            ExitStatus::Success.into()
        }
        Err(e) => {
            error!("{e:#}");
            ExitStatus::RuntimeError.into()
        }
    }
}

fn run(bus: &RemoteBus, cli: &Cli) -> anyhow::Result<u64> {
    let mut sender =
        AutoSender::new(bus, &cli.name, cli.payload_size).context("creating bus endpoints")?;
    let interval = Duration::from_millis(cli.interval_ms);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the sender runtime")?;

    runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received Ctrl+C, shutting down"),
                Err(e) => error!("failed to listen for Ctrl+C: {e}"),
            }
            signal_token.cancel();
        });

        info!(
            "sending random {}-byte payloads every {} ms, press Ctrl+C to stop",
            cli.payload_size, cli.interval_ms
        );
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(0),
            _ = tokio::time::sleep(SETUP_DELAY) => {}
        }

        let mut rng = StdRng::from_entropy();
        sender
            .run(&mut rng, interval, shutdown)
            .await
            .context("publishing payload")
    })
}
