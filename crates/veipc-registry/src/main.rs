//! veipc-registry: development bus registry.
//!
//! ```text
//! veipc-registry [--listen-uri silkit://0.0.0.0:8501]
//! ```
//!
//! Log verbosity is controlled with `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use veipc_core::domain::{RegistryUri, DEFAULT_REGISTRY_URI};
use veipc_registry::Registry;

/// Development registry routing publish/subscribe traffic between participants.
#[derive(Debug, Parser)]
#[command(name = "veipc-registry", version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = DEFAULT_REGISTRY_URI, env = "VEIPC_REGISTRY_URI")]
    listen_uri: RegistryUri,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let registry = Registry::bind(&cli.listen_uri.socket_address())
        .await
        .with_context(|| format!("starting registry on {}", cli.listen_uri))?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(e) => error!("failed to listen for Ctrl+C: {e}"),
        }
        signal_token.cancel();
    });

    registry.run(shutdown).await;
    Ok(())
}
