#![warn(
    clippy::all,
    clippy::cargo,
    clippy::perf,
    clippy::style,
    clippy::correctness,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod tls;

pub use client::PgConnection;
pub use config::{ConnectConfig, SslMode, TlsConfig};
pub use credentials::{
    AuthMethod, ChallengeMaterial, CredentialRequest, CredentialResponse, CredentialSource,
    LocalCredentialSource,
};
pub use error::{PgAuthError, Result};
pub use handshake::{HandshakeController, HandshakeState, MaybeTlsStream, PollAction};
