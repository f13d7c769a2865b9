//! Application layer: bridge sessions and their manager.

pub mod bridge_manager;
pub mod bridge_session;

pub use bridge_manager::{BridgeError, BridgeManager, IO_THREAD_NAME};
pub use bridge_session::{BridgeContext, BridgeSession, SessionEnd};
