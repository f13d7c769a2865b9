//! Infrastructure layer: tokio TCP sockets and configuration file loading.

pub mod config_file;
pub mod socket_endpoint;

pub use config_file::{load_overrides, parse_overrides, ConfigError, ConfigFormat};
pub use socket_endpoint::{
    EndpointError, EndpointHandle, EndpointListener, EndpointState, EndpointStatus, FrameReader,
    FrameWriter, SocketEndpoint,
};
