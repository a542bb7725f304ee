//! SCRAM-SHA-256 challenge/response session (RFC 5802 / RFC 7677).
//!
//! Four messages per authentication attempt:
//!
//! 1. client-first: username + fresh client nonce
//! 2. server-first: combined nonce, salt, iteration count
//! 3. client-final: channel binding + combined nonce + proof
//! 4. server-final: server signature (mutual authentication)
//!
//! Unlike a password-holding client, the session never derives the proof
//! itself: it assembles the transcript, hands the parameters to the
//! credential source, and splices the returned proof into client-final. The
//! expected server signature comes back from the same call, so server-final
//! verification stays mandatory even though no password is present locally.
//!
//! The derivation helpers ([`hi_sha256`], [`derive_client_proof`],
//! [`derive_server_signature`]) are exported for credential sources that
//! compute proofs from a real password, such as
//! [`LocalCredentialSource`](crate::credentials::LocalCredentialSource).

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{PgAuthError, Result};

type HmacSha256 = Hmac<Sha256>;

/// The only SASL mechanism (hash/digest identifier) this layer supports.
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Ephemeral SCRAM session state, one per authentication attempt.
///
/// Holds the client nonce and client-first message; discarded after the
/// attempt succeeds or fails. The nonce is freshly random for every session.
#[derive(Debug, Clone)]
pub struct ScramSession {
    /// Base64-encoded client nonce (18 random bytes).
    pub client_nonce_b64: String,
    /// client-first-message-bare (without the gs2 header).
    pub client_first_bare: String,
    /// Complete client-first-message to send to the server.
    pub client_first: String,
}

/// Transcript parameters assembled from server-first, ready to hand to the
/// credential source and to finish the exchange with.
#[derive(Debug, Clone)]
pub struct ScramTranscript {
    /// Decoded server-side salt.
    pub salt: Vec<u8>,
    /// Iteration count from server-first.
    pub iterations: u32,
    /// client-first-bare "," server-first "," client-final-without-proof
    pub auth_message: String,
    client_final_without_proof: String,
}

impl ScramSession {
    /// Create a new session with a fresh random nonce.
    pub fn new(username: &str) -> ScramSession {
        let mut nonce = [0u8; 18];
        rand::rng().fill_bytes(&mut nonce);
        Self::from_nonce(username, &B64.encode(nonce))
    }

    /// Create a session with a caller-chosen nonce (deterministic tests).
    #[cfg(test)]
    pub(crate) fn with_nonce(username: &str, nonce_b64: &str) -> ScramSession {
        Self::from_nonce(username, nonce_b64)
    }

    fn from_nonce(username: &str, nonce_b64: &str) -> ScramSession {
        let user = sasl_escape_username(username);
        let client_first_bare = format!("n={user},r={nonce_b64}");
        // "n,," = no channel binding at the SASL layer; secure-channel
        // awareness travels to the credential source instead.
        let client_first = format!("n,,{client_first_bare}");

        ScramSession {
            client_nonce_b64: nonce_b64.to_string(),
            client_first_bare,
            client_first,
        }
    }

    /// Parse server-first-message into (combined nonce, salt b64, iterations).
    ///
    /// # Errors
    /// `Protocol` if any required attribute is missing or malformed.
    pub fn parse_server_first(server_first: &str) -> Result<(String, String, u32)> {
        let mut r = None;
        let mut s = None;
        let mut i = None;

        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("r=") {
                r = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("s=") {
                s = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("i=") {
                i = v.parse::<u32>().ok();
            }
        }

        Ok((
            r.ok_or_else(|| PgAuthError::Protocol("server-first missing nonce (r=)".into()))?,
            s.ok_or_else(|| PgAuthError::Protocol("server-first missing salt (s=)".into()))?,
            i.ok_or_else(|| {
                PgAuthError::Protocol(
                    "server-first missing or invalid iteration count (i=)".into(),
                )
            })?,
        ))
    }

    /// Consume server-first and assemble the transcript.
    ///
    /// # Errors
    /// - `Protocol("nonce mismatch...")` if the combined nonce does not start
    ///   with this session's client nonce (possible MITM)
    /// - `Protocol` on invalid salt base64
    pub fn transcript(&self, server_first: &str) -> Result<ScramTranscript> {
        let (combined_nonce, salt_b64, iterations) = Self::parse_server_first(server_first)?;

        if !combined_nonce.starts_with(&self.client_nonce_b64) {
            return Err(PgAuthError::Protocol(
                "nonce mismatch: server nonce does not extend client nonce".into(),
            ));
        }

        let salt = B64
            .decode(salt_b64.as_bytes())
            .map_err(|e| PgAuthError::Protocol(format!("invalid salt base64: {e}")))?;

        // "biws" = base64("n,,"), matching the gs2 header of client-first.
        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        Ok(ScramTranscript {
            salt,
            iterations,
            auth_message,
            client_final_without_proof,
        })
    }

    /// Assemble client-final-message from an externally computed proof.
    pub fn client_final(transcript: &ScramTranscript, client_proof: &[u8]) -> String {
        format!(
            "{},p={}",
            transcript.client_final_without_proof,
            B64.encode(client_proof)
        )
    }

    /// Verify server-final-message against the expected server signature.
    ///
    /// Mandatory step: without it a spoofed server could complete the
    /// handshake by echoing an accepted-looking response.
    ///
    /// # Errors
    /// - `Auth` if the server reported an error (`e=` attribute)
    /// - `Protocol` on missing/invalid signature encoding
    /// - `BadServerSignature` on mismatch
    pub fn verify_server_final(
        server_final: &str,
        expected_server_signature: &[u8],
    ) -> Result<()> {
        if let Some(err) = server_final.split(',').find_map(|p| p.strip_prefix("e=")) {
            return Err(PgAuthError::Auth(format!(
                "server rejected authentication: {err}"
            )));
        }

        let v = server_final
            .split(',')
            .find_map(|p| p.strip_prefix("v="))
            .ok_or_else(|| {
                PgAuthError::Protocol("server-final missing signature (v=)".into())
            })?;

        let server_sig = B64
            .decode(v.trim().as_bytes())
            .map_err(|e| PgAuthError::Protocol(format!("invalid server signature base64: {e}")))?;

        if !constant_time_eq(&server_sig, expected_server_signature) {
            return Err(PgAuthError::BadServerSignature);
        }

        Ok(())
    }
}

/// SASL-escape a username per RFC 5802 (`=` as `=3D`, `,` as `=2C`).
fn sasl_escape_username(u: &str) -> String {
    u.replace('=', "=3D").replace(',', "=2C")
}

/// Hi() from RFC 5802 - PBKDF2-HMAC-SHA256 key derivation.
pub fn hi_sha256(password: &[u8], salt: &[u8], iters: u32) -> Vec<u8> {
    // U1 = HMAC(password, salt || INT(1))
    let mut s1 = Vec::with_capacity(salt.len() + 4);
    s1.extend_from_slice(salt);
    s1.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac_sha256(password, &s1);
    let mut out = u.clone();

    // Ui = HMAC(password, U(i-1)), result = U1 XOR U2 XOR ... XOR Ui
    for _ in 1..iters {
        u = hmac_sha256(password, &u);
        for (o, ui) in out.iter_mut().zip(u.iter()) {
            *o ^= *ui;
        }
    }

    out
}

/// ClientProof = ClientKey XOR HMAC(StoredKey, AuthMessage).
pub fn derive_client_proof(salted_password: &[u8], auth_message: &str) -> Vec<u8> {
    let client_key = hmac_sha256(salted_password, b"Client Key");
    let stored_key = Sha256::digest(&client_key);
    let client_sig = hmac_sha256(stored_key.as_slice(), auth_message.as_bytes());
    xor_bytes(&client_key, &client_sig)
}

/// ServerSignature = HMAC(ServerKey, AuthMessage).
pub fn derive_server_signature(salted_password: &[u8], auth_message: &str) -> Vec<u8> {
    let server_key = hmac_sha256(salted_password, b"Server Key");
    hmac_sha256(&server_key, auth_message.as_bytes())
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length is always valid");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len(), "XOR operands must have equal length");
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Constant-time byte slice comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let result = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_builds_first_message() {
        let s = ScramSession::new("user");
        assert!(s.client_first.starts_with("n,,n=user,r="));
        assert!(s.client_first_bare.starts_with("n=user,r="));
        assert!(!s.client_nonce_b64.is_empty());
    }

    #[test]
    fn session_escapes_special_chars_in_username() {
        let s = ScramSession::new("user=name,test");
        assert!(s.client_first.contains("n=user=3Dname=2Ctest,r="));
    }

    #[test]
    fn nonces_are_never_reused_across_sessions() {
        let s1 = ScramSession::new("user");
        let s2 = ScramSession::new("user");
        assert_ne!(s1.client_nonce_b64, s2.client_nonce_b64);
        assert_ne!(s1.client_first, s2.client_first);
    }

    #[test]
    fn parse_server_first_valid() {
        let (r, s, i) = ScramSession::parse_server_first("r=abc123,s=c2FsdA==,i=4096").unwrap();
        assert_eq!(r, "abc123");
        assert_eq!(s, "c2FsdA==");
        assert_eq!(i, 4096);
    }

    #[test]
    fn parse_server_first_any_order_and_extensions() {
        let (r, s, i) =
            ScramSession::parse_server_first("i=1000,s=Zm9v,r=xyz,x=future-ext").unwrap();
        assert_eq!(r, "xyz");
        assert_eq!(s, "Zm9v");
        assert_eq!(i, 1000);
    }

    #[test]
    fn parse_server_first_missing_fields() {
        let err = ScramSession::parse_server_first("s=c2FsdA==,i=4096").unwrap_err();
        assert!(err.to_string().contains("nonce"));

        let err = ScramSession::parse_server_first("r=abc,i=4096").unwrap_err();
        assert!(err.to_string().contains("salt"));

        let err = ScramSession::parse_server_first("r=abc,s=c2FsdA==").unwrap_err();
        assert!(err.to_string().contains("iteration"));

        let err = ScramSession::parse_server_first("r=abc,s=c2FsdA==,i=NaN").unwrap_err();
        assert!(err.to_string().contains("iteration"));
    }

    #[test]
    fn transcript_rejects_nonce_mismatch() {
        let s = ScramSession::with_nonce("user", "clientnonce");
        let err = s
            .transcript("r=differentnonce,s=c2FsdA==,i=4096")
            .unwrap_err();
        assert!(err.to_string().contains("nonce mismatch"));
    }

    #[test]
    fn transcript_rejects_invalid_salt_base64() {
        let s = ScramSession::with_nonce("user", "abc");
        let err = s.transcript("r=abcdef,s=!!!bad!!!,i=4096").unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn transcript_and_final_assembly() {
        let s = ScramSession::with_nonce("user", "fyko+d2lbbFgONRv9qkxdawL");
        let server_first = "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";

        let t = s.transcript(server_first).unwrap();
        assert_eq!(t.iterations, 4096);
        assert!(t.auth_message.starts_with(&s.client_first_bare));
        assert!(t.auth_message.contains(server_first));
        assert!(t.auth_message.ends_with("c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j"));

        let final_msg = ScramSession::client_final(&t, &[0xAB; 32]);
        assert!(final_msg.starts_with("c=biws,r="));
        assert!(final_msg.contains(",p="));
    }

    #[test]
    fn full_exchange_against_locally_derived_keys() {
        // Reference vector setup from RFC 5802's worked example shape:
        // derive everything from the password, splice the proof in, then
        // verify the matching server signature.
        let s = ScramSession::with_nonce("user", "fyko+d2lbbFgONRv9qkxdawL");
        let server_first = "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
        let t = s.transcript(server_first).unwrap();

        let salted = hi_sha256(b"pencil", &t.salt, t.iterations);
        let proof = derive_client_proof(&salted, &t.auth_message);
        assert_eq!(proof.len(), 32);

        let server_sig = derive_server_signature(&salted, &t.auth_message);
        let server_final = format!("v={}", B64.encode(&server_sig));
        ScramSession::verify_server_final(&server_final, &server_sig).unwrap();
    }

    #[test]
    fn verify_server_final_rejects_wrong_signature() {
        let expected = vec![7u8; 32];
        let err = ScramSession::verify_server_final(
            "v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            &expected,
        )
        .unwrap_err();
        assert!(matches!(err, PgAuthError::BadServerSignature));
        assert!(err.is_security());
    }

    #[test]
    fn verify_server_final_rejects_missing_signature() {
        let err = ScramSession::verify_server_final("", &[]).unwrap_err();
        assert!(err.to_string().contains("missing signature"));
    }

    #[test]
    fn verify_server_final_surfaces_server_error() {
        let err = ScramSession::verify_server_final("e=invalid-proof", &[]).unwrap_err();
        assert!(err.to_string().contains("invalid-proof"));
        assert!(!err.is_security());
    }

    #[test]
    fn verify_server_final_rejects_invalid_base64() {
        let err = ScramSession::verify_server_final("v=!!!bad!!!", &[]).unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn sasl_escape_username_variants() {
        assert_eq!(sasl_escape_username("a=b"), "a=3Db");
        assert_eq!(sasl_escape_username("a,b"), "a=2Cb");
        assert_eq!(sasl_escape_username("a=b,c"), "a=3Db=2Cc");
        assert_eq!(sasl_escape_username("normal_user123"), "normal_user123");
    }

    #[test]
    fn hi_sha256_iteration_count_matters() {
        let a = hi_sha256(b"password", b"salt", 1);
        let b = hi_sha256(b"password", b"salt", 4096);
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn constant_time_eq_behaviour() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(constant_time_eq(&[], &[]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn xor_bytes_works() {
        assert_eq!(xor_bytes(&[0xFF, 0x00], &[0x0F, 0xF0]), vec![0xF0, 0xF0]);
    }
}
