//! veipc-echo-server: echoes length-prefixed frames back to one client.
//!
//! ```text
//! veipc-echo-server [--endianness big_endian|little_endian] [--bind 0.0.0.0:6666]
//! ```
//!
//! Exits after the client disconnects.  A client that hangs up mid-frame is
//! logged but still counts as a normal shutdown; failing to bind or accept
//! exits with code 4.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use veipc_adapter::domain::ExitStatus;
use veipc_core::protocol::Endianness;
use veipc_demos::echo::{EchoError, EchoServer, DEFAULT_ECHO_BIND};

/// Echo server speaking the adapter's 2-byte length-prefixed framing.
#[derive(Debug, Parser)]
#[command(name = "veipc-echo-server", version)]
struct Cli {
    /// Byte order of the 2-byte length header.
    #[arg(long, default_value = "little_endian")]
    endianness: Endianness,

    /// Address to listen on.
    #[arg(long, default_value = DEFAULT_ECHO_BIND)]
    bind: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("using {} for the length header", cli.endianness);
    let server = match EchoServer::bind(&cli.bind, cli.endianness).await {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            return ExitStatus::RuntimeError.into();
        }
    };
    match server.local_addr() {
        Ok(addr) => info!("listening on {addr}"),
        Err(e) => warn!("could not read local address: {e}"),
    }

    match server.serve_one().await {
        Ok(_) => {}
        Err(e @ EchoError::Accept(_)) => {
            error!("{e}");
            return ExitStatus::RuntimeError.into();
        }
        Err(e) => warn!("connection closed: {e}"),
    }
    info!("client disconnected, shutting down");
    ExitStatus::Success.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["veipc-echo-server"]);
        assert_eq!(cli.endianness, Endianness::Little);
        assert_eq!(cli.bind, "0.0.0.0:6666");
    }

    #[test]
    fn test_invalid_endianness_is_rejected() {
        assert!(Cli::try_parse_from(["veipc-echo-server", "--endianness", "middle"]).is_err());
    }
}
