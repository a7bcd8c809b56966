//! Length-prefixed framing.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! CBOR-encoded `IpcMessage`.

use crate::error::{IpcError, IpcResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use treesync_protocol::{IpcMessage, MAX_FRAME_LEN};

/// Encodes a message into a frame payload.
///
/// Fails with `FrameTooLarge` if the payload would not fit in one frame.
pub fn encode_frame(message: &IpcMessage) -> IpcResult<Vec<u8>> {
    let payload = message.encode()?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(payload.len()));
    }
    Ok(payload)
}

/// Writes an already encoded payload as a frame.
pub async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> IpcResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(payload.len()));
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes one message as a frame.
pub async fn write_frame<W>(writer: &mut W, message: &IpcMessage) -> IpcResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload = encode_frame(message)?;
    write_payload(writer, &payload).await
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the connection between frames.
pub async fn read_frame<R>(reader: &mut R) -> IpcResult<Option<IpcMessage>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(IpcMessage::decode(&payload)?))
}
