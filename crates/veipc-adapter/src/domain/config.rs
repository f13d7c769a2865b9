//! Adapter configuration types.
//!
//! [`AdapterConfig`] is the single source of truth for all runtime settings.
//! It is built from CLI arguments in `main.rs`; a configuration file may then
//! override the bus-connection parameters (participant name, registry URI and
//! log level) through [`ParticipantOverrides`].  Socket specifications and
//! session policies are never taken from the file.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use veipc_core::domain::{RegistryUri, SocketSpec};
use veipc_core::protocol::Endianness;

/// Participant name used when `--name` is not given.
pub const DEFAULT_PARTICIPANT_NAME: &str = "SilKitAdapterVeIpc";

/// Default time allowed for dialing a `connect` socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of each session's bus → socket queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Log verbosity in the middleware's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Warn,
    #[default]
    Info,
    Error,
    Critical,
    Off,
}

impl FromStr for LogLevel {
    type Err = String;

    /// Accepts the documented spelling in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            "off" => Ok(Self::Off),
            _ => Err(format!(
                "invalid log level '{s}', expected one of Trace|Debug|Warn|Info|Error|Critical|Off"
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Error => "Error",
            Self::Critical => "Critical",
            Self::Off => "Off",
        };
        f.write_str(name)
    }
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    ///
    /// `tracing` has no level above `error`, so `Critical` maps to `error`.
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Error | Self::Critical => "error",
            Self::Off => "off",
        }
    }
}

/// What a session does when its TCP connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// The session ends; its siblings keep running.
    #[default]
    Never,
    /// Re-open the socket every `interval`, up to `max_attempts` times in a
    /// row (`None` = forever).  Publisher and subscription are kept.
    Retry {
        interval: Duration,
        max_attempts: Option<u32>,
    },
}

/// Settings shared by every bridge session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Byte order of every socket's length header.
    pub endianness: Endianness,
    /// Forward zero-length frames instead of skipping them.
    pub forward_empty_frames: bool,
    /// Upper bound for dialing a `connect` socket.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Bus → socket messages buffered per session before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            endianness: Endianness::Little,
            forward_empty_frames: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::Never,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Bus-connection parameters read from a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantOverrides {
    pub participant_name: Option<String>,
    pub registry_uri: Option<RegistryUri>,
    pub log_level: Option<LogLevel>,
}

/// All runtime configuration for the adapter process.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub participant_name: String,
    pub registry_uri: RegistryUri,
    pub log_level: LogLevel,
    /// Path passed with `--configuration`, if any.
    pub configuration: Option<PathBuf>,
    pub specs: Vec<SocketSpec>,
    pub options: BridgeOptions,
}

impl AdapterConfig {
    /// Applies configuration-file values on top of the CLI-derived ones.
    pub fn apply_overrides(&mut self, overrides: ParticipantOverrides) {
        if let Some(name) = overrides.participant_name {
            self.participant_name = name;
        }
        if let Some(uri) = overrides.registry_uri {
            self.registry_uri = uri;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use veipc_core::domain::SocketRole;

    fn base_config() -> AdapterConfig {
        AdapterConfig {
            participant_name: DEFAULT_PARTICIPANT_NAME.to_string(),
            registry_uri: RegistryUri::default(),
            log_level: LogLevel::Info,
            configuration: None,
            specs: vec![
                SocketSpec::parse("localhost:6666,toSocket,fromSocket", SocketRole::Connect)
                    .unwrap(),
            ],
            options: BridgeOptions::default(),
        }
    }

    #[test]
    fn test_log_level_parses_documented_spelling() {
        assert_eq!("Critical".parse::<LogLevel>(), Ok(LogLevel::Critical));
        assert_eq!("Off".parse::<LogLevel>(), Ok(LogLevel::Off));
    }

    #[test]
    fn test_log_level_parse_ignores_case() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
    }

    #[test]
    fn test_log_level_rejects_unknown() {
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_critical_maps_to_error_filter() {
        assert_eq!(LogLevel::Critical.as_filter_directive(), "error");
        assert_eq!(LogLevel::Off.as_filter_directive(), "off");
    }

    #[test]
    fn test_default_bridge_options() {
        let options = BridgeOptions::default();
        assert_eq!(options.endianness, Endianness::Little);
        assert!(!options.forward_empty_frames);
        assert_eq!(options.reconnect, ReconnectPolicy::Never);
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides_replace_bus_parameters() {
        // Arrange
        let mut config = base_config();
        let overrides = ParticipantOverrides {
            participant_name: Some("FromFile".to_string()),
            registry_uri: Some("silkit://10.0.0.9:9000".parse().unwrap()),
            log_level: Some(LogLevel::Trace),
        };

        // Act
        config.apply_overrides(overrides);

        // Assert
        assert_eq!(config.participant_name, "FromFile");
        assert_eq!(config.registry_uri.port, 9000);
        assert_eq!(config.log_level, LogLevel::Trace);
    }

    #[test]
    fn test_empty_overrides_keep_cli_values_and_specs() {
        let mut config = base_config();
        config.apply_overrides(ParticipantOverrides::default());
        assert_eq!(config.participant_name, DEFAULT_PARTICIPANT_NAME);
        assert_eq!(config.specs.len(), 1);
        assert_eq!(config.log_level, LogLevel::Info);
    }
}
