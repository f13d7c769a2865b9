//! # veipc-demos
//!
//! Two small programs for trying the adapter without real hardware:
//!
//! - **`echo`** – a TCP server that speaks the adapter's length-prefixed
//!   framing and writes every frame straight back (`veipc-echo-server`).
//!
//! - **`auto_sender`** – a bus participant that publishes random payloads on
//!   `toSocket` and logs whatever comes back on `fromSocket`
//!   (`veipc-auto-sender`).
//!
//! A full loop runs the adapter with the sender's topics swapped, so that
//! the sender's `toSocket` is the adapter's subscription:
//!
//! ```text
//! veipc-registry
//! veipc-echo-server --endianness little_endian
//! veipc-adapter localhost:6666,fromSocket,toSocket
//! veipc-auto-sender --payload-size 8
//! ```

pub mod auto_sender;
pub mod echo;
pub mod hex;

pub use auto_sender::{AutoSender, SenderError};
pub use echo::{echo_frames, EchoError, EchoServer, EchoStats};
pub use hex::{format_hex, HEX_PREVIEW_LIMIT};
