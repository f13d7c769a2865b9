//! Length-prefixed frame codec used on the socket side of the bridge.
//!
//! Wire format:
//! ```text
//! [length:2][payload:length]
//! ```
//! The length header is an unsigned 16-bit integer in the configured byte
//! order.  Payload bytes are opaque and never reordered.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the length header in bytes.
pub const HEADER_SIZE: usize = 2;

/// Largest payload a 2-byte header can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Errors produced while building or extracting frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The payload does not fit into the length header.
    #[error("payload of {len} bytes exceeds the maximum frame payload of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// The buffer does not yet hold a complete frame.
    #[error("insufficient data: need {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },
}

/// Byte order of the length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Endianness {
    #[serde(rename = "big_endian")]
    Big,
    #[default]
    #[serde(rename = "little_endian")]
    Little,
}

/// Returned when an endianness string is neither `big_endian` nor `little_endian`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid endianness value '{0}', expected 'big_endian' or 'little_endian'")]
pub struct ParseEndiannessError(pub String);

impl FromStr for Endianness {
    type Err = ParseEndiannessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "big_endian" => Ok(Self::Big),
            "little_endian" => Ok(Self::Little),
            other => Err(ParseEndiannessError(other.to_string())),
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Big => f.write_str("big_endian"),
            Self::Little => f.write_str("little_endian"),
        }
    }
}

/// Interprets a length header in the given byte order.
///
/// Every bit pattern is a valid length.
///
/// # Examples
///
/// ```rust
/// use veipc_core::protocol::frame::{decode_header, Endianness};
///
/// assert_eq!(decode_header([0x02, 0x00], Endianness::Little), 2);
/// assert_eq!(decode_header([0x00, 0x02], Endianness::Big), 2);
/// ```
pub fn decode_header(header: [u8; HEADER_SIZE], endianness: Endianness) -> u16 {
    match endianness {
        Endianness::Big => u16::from_be_bytes(header),
        Endianness::Little => u16::from_le_bytes(header),
    }
}

/// Encodes a payload length as a header in the given byte order.
pub fn encode_header(length: u16, endianness: Endianness) -> [u8; HEADER_SIZE] {
    match endianness {
        Endianness::Big => length.to_be_bytes(),
        Endianness::Little => length.to_le_bytes(),
    }
}

/// One length-prefixed unit of socket data.
///
/// The payload length is validated at construction, so every `Frame` can be
/// encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Wraps `payload` in a frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if the payload is longer than
    /// [`MAX_PAYLOAD_LEN`].
    pub fn new(payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self { payload })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The header for this frame in the given byte order.
    pub fn header(&self, endianness: Endianness) -> [u8; HEADER_SIZE] {
        // Length was checked in `new`.
        encode_header(self.payload.len() as u16, endianness)
    }

    /// Encodes header and payload into one contiguous buffer.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use veipc_core::protocol::frame::{Endianness, Frame};
    ///
    /// let frame = Frame::new(vec![0xDE, 0xAD]).unwrap();
    /// assert_eq!(frame.encode(Endianness::Little), vec![0x02, 0x00, 0xDE, 0xAD]);
    /// assert_eq!(frame.encode(Endianness::Big), vec![0x00, 0x02, 0xDE, 0xAD]);
    /// ```
    pub fn encode(&self, endianness: Endianness) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header(endianness));
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the frame and the number of bytes consumed so callers that
/// accumulate stream data can drain their buffer.
///
/// # Errors
///
/// Returns [`FrameError::InsufficientData`] if `bytes` does not yet contain
/// the complete header and payload.
pub fn decode_frame(bytes: &[u8], endianness: Endianness) -> Result<(Frame, usize), FrameError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let length = decode_header([bytes[0], bytes[1]], endianness) as usize;
    let total = HEADER_SIZE + length;
    if bytes.len() < total {
        return Err(FrameError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let payload = bytes[HEADER_SIZE..total].to_vec();
    Ok((Frame { payload }, total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
