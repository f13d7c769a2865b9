//! Domain types with no I/O: socket specifications and registry addresses.

pub mod registry_uri;
pub mod socket_spec;

pub use registry_uri::{RegistryUri, UriError, DEFAULT_REGISTRY_URI};
pub use socket_spec::{ensure_unique, parse_socket_specs, SocketRole, SocketSpec, SpecError};
