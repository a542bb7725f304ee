//! PostgreSQL client with broker-backed authentication.
//!
//! [`PgConnection::connect`] opens a TCP (or TLS) transport, drives the
//! authentication handshake through the interception controller, and
//! consumes the remaining startup messages up to ReadyForQuery. No password
//! ever enters this process: challenge responses are computed by the
//! configured [`CredentialSource`](crate::credentials::CredentialSource).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pgwire_broker_auth::{ConnectConfig, PgConnection};
//! use pgwire_broker_auth::credentials::LocalCredentialSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = ConnectConfig {
//!         host: "localhost".into(),
//!         port: 5432,
//!         user: "app".into(),
//!         database: "appdb".into(),
//!         credential_source: Some(Arc::new(LocalCredentialSource::new("secret"))),
//!         ..ConnectConfig::default()
//!     };
//!
//!     let conn = PgConnection::connect(cfg).await?;
//!     println!("server {}", conn.parameters()["server_version"]);
//!     Ok(())
//! }
//! ```

mod tokio_client;

pub use tokio_client::PgConnection;
