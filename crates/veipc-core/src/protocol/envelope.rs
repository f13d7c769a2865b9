//! Bus-side serialization envelope.
//!
//! Payloads published on the bus are wrapped in the middleware's data
//! serialization format for byte sequences:
//! ```text
//! [length:4 little-endian][bytes:length]
//! ```

use thiserror::Error;

/// Size of the envelope's length prefix.
pub const ENVELOPE_HEADER_SIZE: usize = 4;

/// Media type announced by publishers and subscribers of raw byte data.
pub const MEDIA_TYPE_DATA: &str = "application/vnd.vector.silkit.data; protocolVersion=1";

/// Errors produced while unwrapping a bus payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The message ended before the declared payload was complete.
    #[error("truncated envelope: declared {declared} payload bytes, {available} available")]
    Truncated { declared: usize, available: usize },

    /// The message is too short to hold the length prefix.
    #[error("envelope shorter than its 4-byte length prefix ({0} bytes)")]
    MissingHeader(usize),
}

/// Wraps `payload` in the bus envelope.
///
/// # Examples
///
/// ```rust
/// use veipc_core::protocol::envelope::serialize_bytes;
///
/// assert_eq!(serialize_bytes(&[0xDE, 0xAD]), vec![2, 0, 0, 0, 0xDE, 0xAD]);
/// ```
pub fn serialize_bytes(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Extracts the payload from a bus envelope.
///
/// Bytes following the declared payload are ignored.
///
/// # Errors
///
/// Returns [`EnvelopeError`] if the envelope is shorter than its header or
/// than the length it declares.
pub fn deserialize_bytes(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    if data.len() < ENVELOPE_HEADER_SIZE {
        return Err(EnvelopeError::MissingHeader(data.len()));
    }
    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[ENVELOPE_HEADER_SIZE..];
    if body.len() < declared {
        return Err(EnvelopeError::Truncated {
            declared,
            available: body.len(),
        });
    }
    Ok(body[..declared].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_prefixes_little_endian_length() {
        let data = serialize_bytes(&[1, 2, 3]);
        assert_eq!(&data[..4], &[3, 0, 0, 0]);
        assert_eq!(&data[4..], &[1, 2, 3]);
    }

    #[test]
    fn test_deserialize_returns_payload() {
        assert_eq!(
            deserialize_bytes(&[2, 0, 0, 0, 0xDE, 0xAD]),
            Ok(vec![0xDE, 0xAD])
        );
    }

    #[test]
    fn test_deserialize_empty_payload() {
        assert_eq!(deserialize_bytes(&[0, 0, 0, 0]), Ok(Vec::new()));
    }

    #[test]
    fn test_deserialize_rejects_short_header() {
        assert_eq!(
            deserialize_bytes(&[1, 0]),
            Err(EnvelopeError::MissingHeader(2))
        );
    }

    #[test]
    fn test_deserialize_rejects_truncated_body() {
        assert_eq!(
            deserialize_bytes(&[5, 0, 0, 0, 1, 2]),
            Err(EnvelopeError::Truncated {
                declared: 5,
                available: 2
            })
        );
    }

    #[test]
    fn test_deserialize_ignores_trailing_bytes() {
        assert_eq!(deserialize_bytes(&[1, 0, 0, 0, 7, 8, 9]), Ok(vec![7]));
    }
}
