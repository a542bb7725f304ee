//! Raw authentication-message framing.
//!
//! Every backend message in the authentication phase is
//! `[1-byte tag][4-byte big-endian length including these 4 bytes][payload]`.
//! Reads and writes are atomic from the caller's perspective: no partial
//! message state survives between calls. Would-block conditions are absorbed
//! by the async runtime; they are normal operation, never errors.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PgAuthError, Result};

/// Upper bound on a single authentication-phase message. Anything larger is
/// a framing desync, not a legitimate challenge.
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// One raw wire message: type tag plus payload.
///
/// Invariant: `payload.len()` equals the wire length prefix minus the
/// prefix's own 4 bytes.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub tag: u8,
    pub payload: Bytes,
}

/// Read one complete message.
///
/// # Errors
/// - `Cancelled` if the stream closes cleanly before the first header byte
///   (the peer went away between messages)
/// - `Protocol` if the stream closes mid-message, or the declared length is
///   shorter than its own prefix or absurdly large
pub async fn read_message<R: AsyncRead + Unpin>(rd: &mut R) -> Result<RawMessage> {
    let mut tag = [0u8; 1];
    if rd.read(&mut tag).await? == 0 {
        return Err(PgAuthError::Cancelled);
    }

    let mut len_buf = [0u8; 4];
    rd.read_exact(&mut len_buf)
        .await
        .map_err(|e| truncated(e, "message header"))?;
    let len = i32::from_be_bytes(len_buf) as isize;

    if len < 4 {
        return Err(PgAuthError::Protocol(format!(
            "invalid message length: {len}"
        )));
    }
    let payload_len = (len - 4) as usize;
    if payload_len > MAX_MESSAGE_LEN {
        return Err(PgAuthError::Protocol(format!(
            "message length {len} exceeds limit"
        )));
    }

    let mut buf = vec![0u8; payload_len];
    rd.read_exact(&mut buf)
        .await
        .map_err(|e| truncated(e, "message payload"))?;

    Ok(RawMessage {
        tag: tag[0],
        payload: Bytes::from(buf),
    })
}

fn truncated(e: std::io::Error, what: &str) -> PgAuthError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        PgAuthError::Protocol(format!("stream closed inside {what}"))
    } else {
        e.into()
    }
}

/// Write one complete message: tag, big-endian length (payload + 4), payload.
///
/// One logical write; flushed before returning. A peer that closed the
/// connection surfaces as `Cancelled`, matching the read side.
pub async fn write_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    tag: u8,
    payload: &[u8],
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(payload.len() + 5);
    buf.put_u8(tag);
    buf.put_i32((payload.len() + 4) as i32);
    buf.extend_from_slice(payload);

    wr.write_all(&buf).await.map_err(peer_closed)?;
    wr.flush().await.map_err(peer_closed)?;
    Ok(())
}

fn peer_closed(e: std::io::Error) -> PgAuthError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            PgAuthError::Cancelled
        }
        _ => e.into(),
    }
}

/// Write the startup message (no tag byte, protocol 3.0 parameter list).
pub async fn write_startup_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    protocol_version: i32,
    params: &[(&str, &str)],
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_i32(0); // length placeholder
    buf.put_i32(protocol_version);

    for (k, v) in params {
        buf.extend_from_slice(k.as_bytes());
        buf.put_u8(0);
        buf.extend_from_slice(v.as_bytes());
        buf.put_u8(0);
    }
    buf.put_u8(0); // terminator

    let len = buf.len() as i32;
    buf[0..4].copy_from_slice(&len.to_be_bytes());

    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}

/// Write the SSLRequest pseudo-message (no tag byte).
pub async fn write_ssl_request<W: AsyncWrite + Unpin>(wr: &mut W) -> Result<()> {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&(8i32).to_be_bytes());
    buf[4..8].copy_from_slice(&(80877103i32).to_be_bytes());
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}
