//! PostgreSQL wire-protocol primitives for the authentication phase.
//!
//! - [`framing`]: raw message framing (tag + length + payload) plus the
//!   startup and SSLRequest writers
//! - [`messages`]: authentication-request and error-response parsing
//!
//! # Wire format
//!
//! Every backend message is `[1-byte tag][4-byte big-endian length including
//! these 4 bytes][payload]`. Startup and SSLRequest messages omit the tag.

pub mod framing;
pub mod messages;

pub use framing::{RawMessage, read_message, write_message};
pub use messages::{parse_auth_request, parse_error_response, parse_sasl_mechanisms};
