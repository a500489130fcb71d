//! Length-prefixed reads and writes on a connection.
//!
//! Everything reads with `read_exact` straight from the socket. Bootstrap
//! hands the same connection to the messenger afterwards, so no bytes may sit
//! in a userspace read buffer when a control exchange ends.

use std::io::ErrorKind;

use bytes::Bytes;
use meshbus_core::HostId;
use meshbus_proto::{ControlMessage, FramePrefix, InboundFrame, ProtocolError, control};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Write one control message and flush.
pub async fn write_control<S, M>(stream: &mut S, message: &M) -> Result<(), FrameError>
where
    S: AsyncWrite + Unpin,
    M: ControlMessage,
{
    let frame = message.to_frame()?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one control message of at most `max_len` bytes.
pub async fn read_control<S, M>(stream: &mut S, max_len: usize) -> Result<M, FrameError>
where
    S: AsyncRead + Unpin,
    M: ControlMessage,
{
    let length = stream.read_i32().await?;
    let invalid = || ProtocolError::FrameLength { len: i64::from(length), max: max_len };
    let length = usize::try_from(length).map_err(|_| invalid())?;
    if length < control::LENGTH_FIELD || length > max_len {
        return Err(invalid().into());
    }
    let mut body = vec![0; length];
    stream.read_exact(&mut body).await?;
    Ok(M::from_body(Bytes::from(body))?)
}

/// Identify this host on a freshly opened peer connection.
pub async fn write_host_id<S: AsyncWrite + Unpin>(
    stream: &mut S,
    host: HostId,
) -> Result<(), FrameError> {
    stream.write_i32(host.0).await?;
    stream.flush().await?;
    Ok(())
}

/// Read the identity written by [`write_host_id`].
pub async fn read_host_id<S: AsyncRead + Unpin>(stream: &mut S) -> Result<HostId, FrameError> {
    Ok(HostId(stream.read_i32().await?))
}

/// Read the next mesh frame. Returns `Ok(None)` when the peer closed the
/// connection between frames.
pub async fn read_frame<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_frame: usize,
) -> Result<Option<InboundFrame>, FrameError> {
    let mut prefix = [0; FramePrefix::SIZE];
    match stream.read_exact(&mut prefix).await {
        Ok(_) => {},
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let prefix = FramePrefix::from_bytes(&prefix)?;
    let mut rest = vec![0; prefix.remaining_len(max_frame)?];
    stream.read_exact(&mut rest).await?;
    Ok(Some(InboundFrame::decode(prefix, Bytes::from(rest))?))
}
