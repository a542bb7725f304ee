//! Error types for pgwire-broker-auth.
//!
//! All errors in this crate are represented by [`PgAuthError`], which covers:
//! - I/O errors (network, file system)
//! - Protocol errors (malformed or unexpected wire data)
//! - Server errors (PostgreSQL error responses)
//! - Authentication errors, including the security-relevant
//!   [`PgAuthError::BadServerSignature`]
//! - Credential-broker failures (unavailable, rejected, timed out)
//! - TLS errors (handshake failure, incompatible session)
//! - Configuration and capability errors at the connect boundary

use thiserror::Error;

/// Error type for all pgwire-broker-auth operations.
#[derive(Debug, Error, Clone)]
pub enum PgAuthError {
    /// I/O error (network, file system).
    ///
    /// Note: `std::io::Error` is not `Clone`, so we store the message.
    #[error("io error: {0}")]
    Io(String),

    /// Protocol error - malformed message or unexpected wire data.
    ///
    /// Fatal for the connection attempt; never retried internally.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server error - PostgreSQL returned an error response.
    ///
    /// The message typically includes the SQLSTATE code.
    #[error("server error: {0}")]
    Server(String),

    /// Authentication error - bad credential material or a broker response
    /// that does not fit the negotiated method.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The server demanded an authentication method this layer does not
    /// implement. Carries the advertised method name.
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(String),

    /// The server-final signature did not match the expected value.
    ///
    /// Security-relevant: a spoofed or compromised server failed mutual
    /// authentication. Kept as its own variant so callers can always tell it
    /// apart from ordinary authentication failures.
    #[error("bad server signature")]
    BadServerSignature,

    /// The credential broker could not be reached.
    #[error("credential broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The credential broker refused to produce a credential for this
    /// identity/target.
    #[error("credential broker rejected request: {0}")]
    BrokerRejected(String),

    /// An operation did not complete within its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The connection was closed while the handshake was still in flight.
    #[error("handshake cancelled: connection closed")]
    Cancelled,

    /// Invalid or missing configuration (e.g. no credential source).
    #[error("configuration error: {0}")]
    Config(String),

    /// The transport cannot provide a mode this design requires
    /// (e.g. TLS requested in a build without the `tls-rustls` feature).
    #[error("capability error: {0}")]
    Capability(String),

    /// TLS error - handshake failure, certificate validation, or an
    /// incompatible negotiated session.
    #[error("tls error: {0}")]
    Tls(String),
}

impl PgAuthError {
    /// Returns `true` if this is an I/O error.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, PgAuthError::Io(_))
    }

    /// Returns `true` if this is a server error.
    #[inline]
    pub fn is_server(&self) -> bool {
        matches!(self, PgAuthError::Server(_))
    }

    /// Returns `true` if this failure is security-relevant rather than
    /// operational (currently only a bad server signature).
    #[inline]
    pub fn is_security(&self) -> bool {
        matches!(self, PgAuthError::BadServerSignature)
    }

    /// Returns `true` if the handshake was cancelled by the connection
    /// closing underneath it.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PgAuthError::Cancelled)
    }

    /// Returns `true` if this error is likely transient and retryable.
    ///
    /// Transient errors are I/O failures, broker unavailability and
    /// timeouts. Retry policy belongs to the caller; nothing in this crate
    /// retries a failed attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PgAuthError::Io(_) | PgAuthError::BrokerUnavailable(_) | PgAuthError::Timeout(_)
        )
    }
}

// Manual From impl since io::Error isn't Clone
impl From<std::io::Error> for PgAuthError {
    fn from(err: std::io::Error) -> Self {
        PgAuthError::Io(err.to_string())
    }
}

/// Result type alias for pgwire-broker-auth operations.
pub type Result<T> = std::result::Result<T, PgAuthError>;
