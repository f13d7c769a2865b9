//! Packets exchanged between participants and the registry.
//!
//! Wire format:
//! ```text
//! [length:4 big-endian][bincode(BusPacket):length]
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Largest packet body accepted from the network.
pub const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

/// Errors on the registry connection.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("packet of {0} bytes exceeds the 16 MiB limit")]
    TooLarge(usize),
}

/// One message on a participant ↔ registry connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusPacket {
    /// First packet from a participant.
    Hello {
        participant: String,
        participant_id: Uuid,
    },
    /// Registry accepted the participant.
    Welcome,
    /// Registry refused the participant; the connection is closed afterwards.
    Reject { reason: String },
    Subscribe {
        subscription_id: Uuid,
        topic: String,
        media_type: String,
    },
    Unsubscribe { subscription_id: Uuid },
    Publish {
        topic: String,
        media_type: String,
        data: Vec<u8>,
    },
    /// Registry → subscriber: `data` matched `subscription_id`.
    Deliver { subscription_id: Uuid, data: Vec<u8> },
}

/// Writes one length-prefixed packet and flushes.
///
/// # Errors
///
/// Returns [`WireError`] if encoding or writing fails.
pub async fn write_packet<W>(writer: &mut W, packet: &BusPacket) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let body = bincode::serialize(packet)?;
    if body.len() > MAX_PACKET_LEN {
        return Err(WireError::TooLarge(body.len()));
    }
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one packet; `Ok(None)` on a clean end of stream.
///
/// # Errors
///
/// Returns [`WireError`] on I/O failure, an oversized length or an
/// undecodable body.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<BusPacket>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_PACKET_LEN {
        return Err(WireError::TooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}
