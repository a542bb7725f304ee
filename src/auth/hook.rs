//! The credential hook: the seam between the handshake machinery and the
//! external broker.
//!
//! This is where the driver's normal "supply stored credential" step is
//! replaced by a dynamically computed response. The hook takes parsed
//! challenge state, not raw wire bytes, so the credential source can perform
//! the cryptographic derivation itself without ever exposing a password to
//! this process.

use tracing::debug;

use crate::credentials::{
    AuthMethod, ChallengeMaterial, CredentialRequest, CredentialResponse, CredentialSource,
};
use crate::error::{PgAuthError, Result};

/// Obtain the computed authentication response for one challenge.
///
/// Invoked exactly once per authentication attempt; the result is used for
/// the attempt's single response round (plus, for SCRAM, the server-final
/// verification that rides in the same response). Not retried internally;
/// the call is idempotent, so retry policy belongs to the caller of the
/// whole connect.
///
/// `secure_channel` is always forwarded so the broker can require
/// channel-binding-aware digesting when the transport is protected.
///
/// # Errors
/// - broker failures propagate unchanged (`BrokerUnavailable`,
///   `BrokerRejected`, `Timeout`)
/// - `Auth` if the response variant does not fit the negotiated method
pub async fn compute_response(
    host: &str,
    port: u16,
    username: &str,
    method: AuthMethod,
    challenge: ChallengeMaterial,
    secure_channel: bool,
    source: &dyn CredentialSource,
) -> Result<CredentialResponse> {
    debug!(%method, host, port, secure_channel, "requesting credential from source");

    let response = source
        .fetch(CredentialRequest {
            host: host.to_string(),
            port,
            username: username.to_string(),
            method,
            challenge,
            secure_channel,
        })
        .await?;

    match (method, &response) {
        (AuthMethod::Md5, CredentialResponse::Md5Hash(_))
        | (AuthMethod::ScramSha256, CredentialResponse::ScramProof { .. }) => Ok(response),
        _ => Err(PgAuthError::Auth(format!(
            "credential source returned a response that does not match method {method}"
        ))),
    }
}
