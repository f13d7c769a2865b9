//! Protocol module: the socket-side frame codec and the bus-side envelope.

pub mod envelope;
pub mod frame;

pub use envelope::{deserialize_bytes, serialize_bytes, EnvelopeError, MEDIA_TYPE_DATA};
pub use frame::{
    decode_frame, decode_header, encode_header, Endianness, Frame, FrameError, HEADER_SIZE,
    MAX_PAYLOAD_LEN,
};
