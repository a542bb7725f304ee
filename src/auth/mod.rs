//! Authentication sub-protocols and the credential hook.
//!
//! Two methods are implemented:
//!
//! - **SCRAM-SHA-256** ([`scram`]): four-message challenge/response with
//!   mandatory server-signature verification (mutual authentication).
//! - **MD5** ([`md5`]): legacy single-round salted hash. No server-identity
//!   check exists in this sub-protocol.
//!
//! Any other method the server demands is an
//! [`UnsupportedMethod`](crate::error::PgAuthError::UnsupportedMethod)
//! outcome, decided by the handshake controller before the credential broker
//! is contacted.
//!
//! Neither module talks to the wire: they turn parsed challenge state plus a
//! broker response ([`hook::compute_response`]) into payload bytes, and the
//! [`handshake`](crate::handshake) controller moves those bytes.

pub mod hook;
pub mod md5;
pub mod scram;

pub use scram::{ScramSession, ScramTranscript};
