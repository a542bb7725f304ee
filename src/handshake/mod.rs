//! Wire-level authentication interception.
//!
//! The controller owns the transport and advances the handshake one poll
//! cycle at a time. When the server requests authentication data, the raw
//! challenge is read and classified, the credential broker is consulted
//! out-of-band, and the computed response is injected back in the server's
//! expected wire format; normal polling then resumes.
//!
//! ```text
//! Connecting -> AwaitingAuthChallenge -> AwaitingBrokerResponse
//!     -> ResponseSent -> Verifying -> Established
//!                       (Failed reachable from every state)
//! ```

mod controller;
mod stream;

pub use controller::{HandshakeController, HandshakeState, PollAction};
pub use stream::{HandshakeStream, MaybeTlsStream};
