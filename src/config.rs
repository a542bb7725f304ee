use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::CredentialSource;

#[derive(Debug, Clone)]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub mode: SslMode,
    pub ca_pem_path: Option<PathBuf>,
    pub sni_hostname: Option<String>,
    pub client_cert_pem_path: Option<PathBuf>,
    pub client_key_pem_path: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            mode: SslMode::Disable,
            ca_pem_path: None,
            sni_hostname: None,
            client_cert_pem_path: None,
            client_key_pem_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,

    pub user: String,
    pub database: String,
    pub application_name: String,

    pub tls: TlsConfig,

    /// The capability that computes authentication responses on demand.
    ///
    /// Required: `connect` fails with a configuration error when absent.
    /// There is deliberately no process-wide default; a shared source is
    /// passed down explicitly by the caller.
    pub credential_source: Option<Arc<dyn CredentialSource>>,

    /// Bound on the whole connection attempt (TCP + TLS + handshake).
    pub connect_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5432,
            user: "postgres".into(),
            database: "postgres".into(),
            application_name: "pgwire-broker-auth".into(),
            tls: TlsConfig::default(),
            credential_source: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}
