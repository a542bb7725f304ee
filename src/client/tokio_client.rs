use std::collections::HashMap;

use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ConnectConfig;
use crate::error::{PgAuthError, Result};
use crate::handshake::{HandshakeController, MaybeTlsStream};
use crate::protocol::framing::read_message;
use crate::protocol::messages::{AUTH_OK, parse_auth_request, parse_error_response};

#[cfg(not(feature = "tls-rustls"))]
use crate::config::SslMode;

/// An authenticated PostgreSQL connection.
///
/// Query execution is deliberately out of scope: the handle exposes the
/// server parameters collected during startup and the raw transport for a
/// higher layer to use.
pub struct PgConnection {
    stream: MaybeTlsStream,
    parameters: HashMap<String, String>,
    backend_pid: i32,
    backend_secret: i32,
}

impl PgConnection {
    /// Connect and authenticate using a broker-supplied credential.
    ///
    /// # Errors
    /// - `Config` if no credential source is configured
    /// - `Capability` if the configuration needs a transport mode this build
    ///   cannot provide (e.g. TLS without the `tls-rustls` feature)
    /// - `Timeout` if the whole attempt exceeds `connect_timeout`
    /// - any terminal handshake failure (see [`PgAuthError`])
    pub async fn connect(cfg: ConnectConfig) -> Result<PgConnection> {
        let deadline = cfg.connect_timeout;
        tokio::time::timeout(deadline, Self::connect_inner(cfg))
            .await
            .map_err(|_| PgAuthError::Timeout(format!("connect exceeded {deadline:?}")))?
    }

    async fn connect_inner(cfg: ConnectConfig) -> Result<PgConnection> {
        let source = cfg
            .credential_source
            .clone()
            .ok_or_else(|| PgAuthError::Config("no credential source configured".into()))?;

        let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port)).await?;
        tcp.set_nodelay(true)?;

        #[cfg(feature = "tls-rustls")]
        let stream = crate::tls::rustls::maybe_upgrade_to_tls(tcp, &cfg.tls, &cfg.host).await?;

        #[cfg(not(feature = "tls-rustls"))]
        let stream = {
            if !matches!(cfg.tls.mode, SslMode::Disable) {
                return Err(PgAuthError::Capability(
                    "TLS requested but the tls-rustls feature is disabled".into(),
                ));
            }
            MaybeTlsStream::Plain(tcp)
        };

        let mut controller = HandshakeController::new(stream, &cfg, source);
        controller.drive().await?;
        debug!(host = %cfg.host, port = cfg.port, "authentication established");

        let stream = controller.into_stream();
        finish_startup(stream).await
    }

    /// Server parameters reported during startup (server_version,
    /// client_encoding, ...).
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    pub fn backend_secret(&self) -> i32 {
        self.backend_secret
    }

    /// Release the underlying transport.
    pub fn into_stream(self) -> MaybeTlsStream {
        self.stream
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("backend_pid", &self.backend_pid)
            .field("parameters", &self.parameters.len())
            .finish_non_exhaustive()
    }
}

/// Consume the remainder of the startup phase: AuthenticationOk,
/// ParameterStatus, BackendKeyData, up to ReadyForQuery.
async fn finish_startup(mut stream: MaybeTlsStream) -> Result<PgConnection> {
    let mut parameters = HashMap::new();
    let mut backend_pid = 0;
    let mut backend_secret = 0;

    loop {
        let msg = read_message(&mut stream).await?;
        match msg.tag {
            b'R' => {
                let (code, _) = parse_auth_request(&msg.payload)?;
                if code != AUTH_OK {
                    return Err(PgAuthError::Protocol(format!(
                        "unexpected auth request {code} after handshake"
                    )));
                }
            }
            b'S' => {
                if let Some((k, v)) = parse_parameter_status(&msg.payload) {
                    parameters.insert(k, v);
                }
            }
            b'K' => {
                if msg.payload.len() >= 8 {
                    backend_pid = i32::from_be_bytes(msg.payload[0..4].try_into().unwrap());
                    backend_secret = i32::from_be_bytes(msg.payload[4..8].try_into().unwrap());
                }
            }
            b'N' => {} // NoticeResponse
            b'E' => return Err(PgAuthError::Server(parse_error_response(&msg.payload))),
            b'Z' => {
                return Ok(PgConnection {
                    stream,
                    parameters,
                    backend_pid,
                    backend_secret,
                });
            }
            other => {
                return Err(PgAuthError::Protocol(format!(
                    "unexpected message tag 0x{other:02x} during startup"
                )));
            }
        }
    }
}

fn parse_parameter_status(payload: &[u8]) -> Option<(String, String)> {
    let mut parts = payload.split(|&b| b == 0);
    let k = parts.next()?;
    let v = parts.next()?;
    if k.is_empty() {
        return None;
    }
    Some((
        String::from_utf8_lossy(k).to_string(),
        String::from_utf8_lossy(v).to_string(),
    ))
}
