//! # veipc-core
//!
//! Shared library for the VeIPC adapter: everything that can be expressed
//! without opening a socket.
//!
//! - **`protocol`** – The socket-side length-prefixed frame codec (2-byte
//!   header, configurable byte order) and the bus-side serialization envelope.
//!
//! - **`domain`** – Socket specifications (`<host>:<port>,<toTopic>,<fromTopic>`)
//!   and registry addresses (`silkit://<host>:<port>`).
//!
//! - **`bus`** – The Bus Gateway traits the bridge consumes, the participant
//!   lifecycle, and an in-process bus used by tests and single-process setups.

pub mod bus;
pub mod domain;
pub mod protocol;

pub use bus::{BusError, BusGateway, DataHandler, DataPublisher, Subscription, TopicSpec};
pub use domain::{parse_socket_specs, RegistryUri, SocketRole, SocketSpec, SpecError};
pub use protocol::{Endianness, Frame, FrameError};
