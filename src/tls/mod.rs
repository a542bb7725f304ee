//! TLS transport upgrade (rustls).
//!
//! The SSLRequest negotiation and channel upgrade happen before the startup
//! message, so the handshake controller only ever sees a finished
//! [`MaybeTlsStream`](crate::handshake::MaybeTlsStream). The controller runs
//! its secure-channel compatibility check once per attempt on top of
//! whatever this layer produced.

#[cfg(feature = "tls-rustls")]
pub mod rustls;
