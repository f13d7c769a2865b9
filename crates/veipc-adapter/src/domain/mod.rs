//! Domain layer for veipc-adapter.
//!
//! Pure configuration and policy types.  Nothing in here opens a socket,
//! spawns a task or reads a file.

pub mod config;
pub mod exit;

pub use config::{
    AdapterConfig, BridgeOptions, LogLevel, ParticipantOverrides, ReconnectPolicy,
    DEFAULT_PARTICIPANT_NAME,
};
pub use exit::ExitStatus;
