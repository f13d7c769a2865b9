//! Loading of the `--configuration` file.
//!
//! The file only carries bus-connection parameters.  Both TOML and JSON are
//! accepted, selected by file extension:
//!
//! ```toml
//! [participant]
//! name = "Adapter1"
//! registry_uri = "silkit://10.0.0.2:8501"
//!
//! [logging]
//! level = "Debug"
//! ```
//!
//! Every key is optional; an empty file overrides nothing.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use veipc_core::domain::RegistryUri;

use crate::domain::{LogLevel, ParticipantOverrides};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// The JSON content could not be parsed.
    #[error("failed to parse configuration JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Neither `.toml` nor `.json`.
    #[error("unsupported configuration file extension: {0}")]
    UnsupportedExtension(PathBuf),

    #[error("invalid registry URI in configuration: {0}")]
    InvalidRegistryUri(String),

    #[error("invalid log level in configuration: {0}")]
    InvalidLogLevel(String),
}

/// Syntax of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Picks the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

// ── File schema ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    participant: ParticipantSection,
    logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ParticipantSection {
    name: Option<String>,
    registry_uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    level: Option<String>,
}

impl ConfigFile {
    fn into_overrides(self) -> Result<ParticipantOverrides, ConfigError> {
        let registry_uri = self
            .participant
            .registry_uri
            .map(|raw| {
                raw.parse::<RegistryUri>()
                    .map_err(|e| ConfigError::InvalidRegistryUri(e.to_string()))
            })
            .transpose()?;
        let log_level = self
            .logging
            .level
            .map(|raw| raw.parse::<LogLevel>().map_err(ConfigError::InvalidLogLevel))
            .transpose()?;
        Ok(ParticipantOverrides {
            participant_name: self.participant.name.filter(|n| !n.is_empty()),
            registry_uri,
            log_level,
        })
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parses configuration text.
///
/// # Errors
///
/// Returns a parse error for malformed text, or an `Invalid*` error for a
/// value that fails validation.
pub fn parse_overrides(text: &str, format: ConfigFormat) -> Result<ParticipantOverrides, ConfigError> {
    let file: ConfigFile = match format {
        ConfigFormat::Toml => toml::from_str(text)?,
        ConfigFormat::Json => serde_json::from_str(text)?,
    };
    file.into_overrides()
}

/// Reads and parses the configuration file at `path`.
///
/// Unlike a settings store, a missing file is an error: the user asked for
/// this path explicitly.
///
/// # Errors
///
/// Returns [`ConfigError::UnsupportedExtension`], [`ConfigError::Io`] or any
/// error of [`parse_overrides`].
pub fn load_overrides(path: &Path) -> Result<ParticipantOverrides, ConfigError> {
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnsupportedExtension(path.to_path_buf()))?;
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let overrides = parse_overrides(&text, format)?;
    debug!("loaded configuration overrides from {}: {overrides:?}", path.display());
    Ok(overrides)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
