//! Message framing: `u32` little-endian length prefix plus wire-encoded body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use weft_proto::{Message, WireDecode, WireEncode};

use crate::NetError;

/// Upper bound on a single frame. Generous for the largest legitimate
/// message (a transfer of many advertisement entries) while keeping a
/// malformed length prefix from allocating unbounded memory.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Writes one framed message.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let body = msg.to_vec();
    if body.len() > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge(body.len()));
    }
    writer.write_u32_le(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, NetError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Message::from_slice(&body)?)
}
