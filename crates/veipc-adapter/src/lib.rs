//! veipc-adapter library crate.
//!
//! Bridges raw length-prefixed TCP byte streams to a publish/subscribe bus.
//! Every socket specification `<host>:<port>,<toTopic>,<fromTopic>` becomes
//! one bridge session: frames read from the socket are published on
//! `toTopic`, messages received on `fromTopic` are written to the socket.
//!
//! # Architecture
//!
//! ```text
//! TCP peer  ([u16 length][payload])*
//!         ↕
//! [veipc-adapter]
//!   ├── domain/           Pure types: AdapterConfig, LogLevel, ReconnectPolicy, exit codes
//!   ├── application/      BridgeSession (one socket ↔ topic pair), BridgeManager
//!   └── infrastructure/
//!         ├── socket_endpoint  tokio TCP connection + frame reader/writer
//!         └── config_file      TOML/JSON --configuration loading
//!         ↕
//! Bus Gateway (veipc-core traits; RemoteBus from veipc-registry in the binary)
//! ```
//!
//! # Layer rules
//!
//! - `domain` performs no I/O.
//! - `application` depends on `domain`, `infrastructure::socket_endpoint` and
//!   the Bus Gateway traits, never on a concrete bus.
//! - `infrastructure` owns every socket and file access.

/// Domain layer: configuration and policy types (no I/O).
pub mod domain;

/// Application layer: sessions and the manager.
pub mod application;

/// Infrastructure layer: TCP endpoints and configuration files.
pub mod infrastructure;
