//! The poll-driven handshake controller.
//!
//! A state machine that advances the connection through its standard startup
//! states, inserting the extra states the brokered flow needs: "challenge
//! received, awaiting broker response" and "response sent, awaiting
//! verification". Each [`poll_cycle`](HandshakeController::poll_cycle) call
//! performs one transition; the returned [`PollAction`] tells the caller
//! what to wait for before polling again. A blocking caller loops via
//! [`drive`](HandshakeController::drive) (or wraps it in `block_on`); a
//! cooperative caller awaits one cycle per readiness event. Both drive the
//! same machine.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::auth::hook::compute_response;
use crate::auth::md5::legacy_response;
use crate::auth::scram::{self, ScramSession};
use crate::config::ConnectConfig;
use crate::credentials::{AuthMethod, ChallengeMaterial, CredentialResponse, CredentialSource};
use crate::error::{PgAuthError, Result};
use crate::protocol::framing::{read_message, write_message, write_startup_message};
use crate::protocol::messages::{
    AUTH_MD5, AUTH_OK, AUTH_SASL, AUTH_SASL_CONTINUE, AUTH_SASL_FINAL, parse_auth_request,
    parse_error_response, parse_sasl_mechanisms,
};

use super::stream::HandshakeStream;

/// Protocol 3.0.
const PROTOCOL_VERSION: i32 = 196608;

/// Handshake controller states.
///
/// `Established` and `Failed` are terminal; `Failed` is reachable from every
/// other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    AwaitingAuthChallenge,
    AwaitingBrokerResponse,
    ResponseSent,
    Verifying,
    Established,
    Failed,
}

/// What the caller should do before the next poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Wait for the socket to become readable.
    NeedsRead,
    /// Wait for the socket to become writable.
    NeedsWrite,
    /// Authentication finished; stop polling this controller.
    Established,
}

/// Per-attempt challenge state: method tag plus the opaque sub-protocol
/// object, owned exclusively by this connection attempt.
enum PendingChallenge {
    Md5 { salt: [u8; 4] },
    Scram { session: ScramSession },
}

/// Drives one connection's authentication handshake.
///
/// Owns the transport for the duration of the handshake and the credential
/// source for the lifetime of the attempt. All challenge/session state is
/// per-connection; nothing is shared.
pub struct HandshakeController<S> {
    stream: S,
    host: String,
    port: u16,
    user: String,
    database: String,
    application_name: String,
    source: Arc<dyn CredentialSource>,

    state: HandshakeState,
    method: Option<AuthMethod>,
    challenge: Option<PendingChallenge>,
    expected_server_signature: Option<Vec<u8>>,
    server_final: Option<String>,
    response_sent: bool,
    ssl_checked: bool,
    failure: Option<PgAuthError>,
}

impl<S: HandshakeStream> HandshakeController<S> {
    pub fn new(stream: S, cfg: &ConnectConfig, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            stream,
            host: cfg.host.clone(),
            port: cfg.port,
            user: cfg.user.clone(),
            database: cfg.database.clone(),
            application_name: cfg.application_name.clone(),
            source,
            state: HandshakeState::Connecting,
            method: None,
            challenge: None,
            expected_server_signature: None,
            server_final: None,
            response_sent: false,
            ssl_checked: false,
            failure: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// True once a challenge has been fully parsed and a response fully
    /// written; never reverts to false afterwards.
    pub fn response_sent(&self) -> bool {
        self.response_sent
    }

    /// The error that moved the controller into `Failed`, if any.
    pub fn failure(&self) -> Option<&PgAuthError> {
        self.failure.as_ref()
    }

    /// Whether per-attempt challenge/session state is still held. Always
    /// false in a terminal state: failure and success both release it.
    pub fn auth_session_active(&self) -> bool {
        self.challenge.is_some()
            || self.expected_server_signature.is_some()
            || self.server_final.is_some()
    }

    /// Release the transport (normally after `Established`).
    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Run poll cycles until a terminal state.
    pub async fn drive(&mut self) -> Result<()> {
        loop {
            if let PollAction::Established = self.poll_cycle().await? {
                return Ok(());
            }
        }
    }

    /// Perform one state transition.
    ///
    /// On error the controller transitions to `Failed`, releases all
    /// per-attempt session state, and stays terminal: no partial success is
    /// ever reported.
    pub async fn poll_cycle(&mut self) -> Result<PollAction> {
        match self.step().await {
            Ok(action) => Ok(action),
            Err(e) => {
                self.challenge = None;
                self.expected_server_signature = None;
                self.server_final = None;
                self.state = HandshakeState::Failed;
                self.failure = Some(e.clone());
                debug!(error = %e, "handshake failed");
                Err(e)
            }
        }
    }

    async fn step(&mut self) -> Result<PollAction> {
        // Secure-channel guard: once per attempt, before any
        // authentication-state handling. The cached result stands for the
        // whole attempt.
        if !self.ssl_checked && self.stream.secure_channel_active() {
            self.stream.verify_secure_channel()?;
            self.ssl_checked = true;
            trace!("secure channel verified");
        }

        match self.state {
            HandshakeState::Connecting => self.send_startup().await,
            HandshakeState::AwaitingAuthChallenge => self.read_challenge().await,
            HandshakeState::AwaitingBrokerResponse => self.respond_to_challenge().await,
            HandshakeState::ResponseSent => self.read_verification().await,
            HandshakeState::Verifying => self.verify_server(),
            HandshakeState::Established => Ok(PollAction::Established),
            HandshakeState::Failed => Err(self
                .failure
                .clone()
                .unwrap_or_else(|| PgAuthError::Protocol("handshake already failed".into()))),
        }
    }

    async fn send_startup(&mut self) -> Result<PollAction> {
        let params = [
            ("user", self.user.as_str()),
            ("database", self.database.as_str()),
            ("client_encoding", "UTF8"),
            ("application_name", self.application_name.as_str()),
        ];
        write_startup_message(&mut self.stream, PROTOCOL_VERSION, &params).await?;
        trace!(user = %self.user, database = %self.database, "startup sent");
        self.state = HandshakeState::AwaitingAuthChallenge;
        Ok(PollAction::NeedsRead)
    }

    /// Read one raw message and classify the authentication challenge.
    ///
    /// Unknown method tags fail fast with `UnsupportedMethod` - before any
    /// session is created, any byte is written, or the broker is contacted.
    async fn read_challenge(&mut self) -> Result<PollAction> {
        let msg = read_message(&mut self.stream).await?;
        match msg.tag {
            b'R' => {
                let (code, rest) = parse_auth_request(&msg.payload)?;
                match code {
                    AUTH_OK => {
                        // Trust/peer auth: no challenge, no broker call.
                        debug!("server requires no authentication challenge");
                        self.state = HandshakeState::Established;
                        Ok(PollAction::Established)
                    }
                    AUTH_MD5 => {
                        if rest.len() != 4 {
                            return Err(PgAuthError::Protocol(
                                "md5 auth request missing 4-byte salt".into(),
                            ));
                        }
                        let mut salt = [0u8; 4];
                        salt.copy_from_slice(rest);
                        debug!("md5 challenge received");
                        self.method = Some(AuthMethod::Md5);
                        self.challenge = Some(PendingChallenge::Md5 { salt });
                        self.state = HandshakeState::AwaitingBrokerResponse;
                        Ok(PollAction::NeedsWrite)
                    }
                    AUTH_SASL => {
                        let offered = parse_sasl_mechanisms(rest);
                        if !offered.iter().any(|m| m == scram::MECHANISM) {
                            return Err(PgAuthError::UnsupportedMethod(offered.join(", ")));
                        }
                        debug!("SASL challenge received, using {}", scram::MECHANISM);
                        self.method = Some(AuthMethod::ScramSha256);
                        self.challenge = Some(PendingChallenge::Scram {
                            session: ScramSession::new(&self.user),
                        });
                        self.state = HandshakeState::AwaitingBrokerResponse;
                        Ok(PollAction::NeedsWrite)
                    }
                    other => Err(PgAuthError::UnsupportedMethod(format!("auth code {other}"))),
                }
            }
            b'E' => Err(PgAuthError::Server(parse_error_response(&msg.payload))),
            // ParameterStatus / BackendKeyData / NoticeResponse may precede
            // the challenge; stay put and read again.
            b'S' | b'K' | b'N' => Ok(PollAction::NeedsRead),
            other => Err(PgAuthError::Protocol(format!(
                "unexpected message tag 0x{other:02x} during authentication"
            ))),
        }
    }

    /// Invoke the matched authenticator, which calls the credential hook
    /// (one broker round trip per attempt), and inject the response.
    ///
    /// For SCRAM this spans the intermediate server-first/client-final
    /// exchange; the controller stays in `AwaitingBrokerResponse` for the
    /// whole sub-dialogue.
    ///
    /// A peer that closed the connection while the broker was being consulted
    /// is detected at the response write (there is no earlier detection point
    /// in the async model) and surfaces as `Cancelled` with `response_sent`
    /// still false.
    async fn respond_to_challenge(&mut self) -> Result<PollAction> {
        let challenge = self
            .challenge
            .take()
            .ok_or_else(|| PgAuthError::Protocol("no pending challenge".into()))?;

        match challenge {
            PendingChallenge::Md5 { salt } => {
                let resp = compute_response(
                    &self.host,
                    self.port,
                    &self.user,
                    AuthMethod::Md5,
                    ChallengeMaterial::Md5Salt(salt),
                    self.stream.secure_channel_active(),
                    self.source.as_ref(),
                )
                .await?;
                let CredentialResponse::Md5Hash(hex) = resp else {
                    return Err(PgAuthError::Auth(
                        "credential source returned non-md5 response".into(),
                    ));
                };
                let payload = legacy_response(&hex)?;
                write_message(&mut self.stream, b'p', &payload).await?;
                debug!("md5 response sent");
            }
            PendingChallenge::Scram { session } => {
                // SASLInitialResponse: mechanism NUL int32(len) client-first
                let mut init = Vec::with_capacity(
                    scram::MECHANISM.len() + 5 + session.client_first.len(),
                );
                init.extend_from_slice(scram::MECHANISM.as_bytes());
                init.push(0);
                init.extend_from_slice(&(session.client_first.len() as i32).to_be_bytes());
                init.extend_from_slice(session.client_first.as_bytes());
                write_message(&mut self.stream, b'p', &init).await?;

                let server_first = self.read_sasl_data(AUTH_SASL_CONTINUE).await?;
                let server_first = std::str::from_utf8(&server_first)
                    .map_err(|_| {
                        PgAuthError::Protocol("server-first is not valid UTF-8".into())
                    })?
                    .to_string();
                let transcript = session.transcript(&server_first)?;

                let resp = compute_response(
                    &self.host,
                    self.port,
                    &self.user,
                    AuthMethod::ScramSha256,
                    ChallengeMaterial::ScramTranscript {
                        salt: transcript.salt.clone(),
                        iterations: transcript.iterations,
                        auth_message: transcript.auth_message.clone(),
                    },
                    self.stream.secure_channel_active(),
                    self.source.as_ref(),
                )
                .await?;
                let CredentialResponse::ScramProof {
                    client_proof,
                    server_signature,
                } = resp
                else {
                    return Err(PgAuthError::Auth(
                        "credential source returned non-scram response".into(),
                    ));
                };

                let client_final = ScramSession::client_final(&transcript, &client_proof);
                write_message(&mut self.stream, b'p', client_final.as_bytes()).await?;
                self.expected_server_signature = Some(server_signature);
                debug!("scram client-final sent");
            }
        }

        self.response_sent = true;
        self.state = HandshakeState::ResponseSent;
        Ok(PollAction::NeedsRead)
    }

    async fn read_verification(&mut self) -> Result<PollAction> {
        match self.method {
            // Legacy method: no verification message from this layer. A
            // rejection arrives later as an ordinary server error during
            // startup completion.
            Some(AuthMethod::Md5) => {
                self.state = HandshakeState::Established;
                Ok(PollAction::Established)
            }
            Some(AuthMethod::ScramSha256) => {
                let blob = self.read_sasl_data(AUTH_SASL_FINAL).await?;
                let server_final = std::str::from_utf8(&blob)
                    .map_err(|_| {
                        PgAuthError::Protocol("server-final is not valid UTF-8".into())
                    })?
                    .to_string();
                self.server_final = Some(server_final);
                self.state = HandshakeState::Verifying;
                Ok(PollAction::NeedsRead)
            }
            None => Err(PgAuthError::Protocol(
                "response sent without a negotiated method".into(),
            )),
        }
    }

    /// Mandatory mutual-authentication step: a spoofed server cannot finish
    /// the handshake by echoing an accepted-looking response.
    fn verify_server(&mut self) -> Result<PollAction> {
        let expected = self
            .expected_server_signature
            .take()
            .ok_or_else(|| PgAuthError::Protocol("no expected server signature".into()))?;
        let server_final = self
            .server_final
            .take()
            .ok_or_else(|| PgAuthError::Protocol("no server-final message".into()))?;

        ScramSession::verify_server_final(&server_final, &expected)?;
        debug!("server signature verified");
        self.state = HandshakeState::Established;
        Ok(PollAction::Established)
    }

    async fn read_sasl_data(&mut self, want_code: i32) -> Result<Vec<u8>> {
        loop {
            let msg = read_message(&mut self.stream).await?;
            match msg.tag {
                b'R' => {
                    let (code, rest) = parse_auth_request(&msg.payload)?;
                    if code == want_code {
                        return Ok(rest.to_vec());
                    }
                    return Err(PgAuthError::Protocol(format!(
                        "unexpected auth code {code}, expected {want_code}"
                    )));
                }
                b'E' => return Err(PgAuthError::Server(parse_error_response(&msg.payload))),
                b'N' => {}
                other => {
                    return Err(PgAuthError::Protocol(format!(
                        "unexpected message tag 0x{other:02x} during SASL exchange"
                    )));
                }
            }
        }
    }
}

impl<S> std::fmt::Debug for HandshakeController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeController")
            .field("state", &self.state)
            .field("method", &self.method)
            .field("response_sent", &self.response_sent)
            .field("ssl_checked", &self.ssl_checked)
            .finish_non_exhaustive()
    }
}
