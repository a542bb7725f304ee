//! The connection collaborator interface.
//!
//! The handshake controller intercepts at the poll-loop boundary via an
//! explicit trait the transport implements - composition, never runtime
//! mutation of a foreign connection type. Any byte stream qualifies; TLS
//! streams additionally report an active secure channel and can be checked
//! for compatibility once per connection attempt.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::error::Result;

#[cfg(feature = "tls-rustls")]
use crate::error::PgAuthError;
#[cfg(feature = "tls-rustls")]
use tokio_rustls::client::TlsStream;

/// A transport the handshake controller can drive.
///
/// Requires a non-blocking byte stream (the async runtime absorbs readiness)
/// plus two secure-channel queries. Implementations exist for plain TCP,
/// rustls TLS streams, in-memory duplex pipes, and [`MaybeTlsStream`].
pub trait HandshakeStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// Whether a secure channel is currently active on this transport.
    fn secure_channel_active(&self) -> bool {
        false
    }

    /// One-shot compatibility check of the active secure channel.
    ///
    /// Called by the controller at most once per connection attempt, before
    /// any authentication-state handling, and only when
    /// [`secure_channel_active`](Self::secure_channel_active) reports true.
    /// Incompatibility is fatal for the whole attempt.
    fn verify_secure_channel(&mut self) -> Result<()> {
        Ok(())
    }
}

impl HandshakeStream for TcpStream {}

// In-memory transport, used by the scripted-server tests.
impl HandshakeStream for tokio::io::DuplexStream {}

#[cfg(feature = "tls-rustls")]
impl HandshakeStream for TlsStream<TcpStream> {
    fn secure_channel_active(&self) -> bool {
        true
    }

    fn verify_secure_channel(&mut self) -> Result<()> {
        use rustls::ProtocolVersion;

        let (_, session) = self.get_ref();
        match session.protocol_version() {
            Some(ProtocolVersion::TLSv1_2 | ProtocolVersion::TLSv1_3) => Ok(()),
            Some(v) => Err(PgAuthError::Tls(format!(
                "incompatible TLS session: negotiated {v:?}"
            ))),
            None => Err(PgAuthError::Tls("TLS handshake not completed".into())),
        }
    }
}

/// A transport that is either plain TCP or TLS over TCP, decided at connect
/// time by the SSLRequest negotiation.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    #[cfg(feature = "tls-rustls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for MaybeTlsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaybeTlsStream::Plain(_) => f.write_str("MaybeTlsStream::Plain"),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(_) => f.write_str("MaybeTlsStream::Tls"),
        }
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

impl HandshakeStream for MaybeTlsStream {
    fn secure_channel_active(&self) -> bool {
        match self {
            MaybeTlsStream::Plain(_) => false,
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(_) => true,
        }
    }

    fn verify_secure_channel(&mut self) -> Result<()> {
        match self {
            MaybeTlsStream::Plain(_) => Ok(()),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => s.as_mut().verify_secure_channel(),
        }
    }
}
