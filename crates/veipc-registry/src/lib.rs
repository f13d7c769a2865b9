//! # veipc-registry
//!
//! A networked Bus Gateway for development and testing setups that have no
//! middleware installation.
//!
//! - **`broker`** – The registry process: accepts participants and routes
//!   every publish to all subscriptions whose topic and media type match.
//! - **`client`** – [`RemoteBus`], the participant side, implementing
//!   [`veipc_core::bus::BusGateway`].
//! - **`wire`** – Length-prefixed bincode packets spoken between the two.

pub mod broker;
pub mod client;
pub mod wire;

pub use broker::{Registry, RegistryError, RegistryState};
pub use client::RemoteBus;
