//! Legacy salted-MD5 authentication (PostgreSQL auth code 5).
//!
//! Single round: one 4-byte salt from the server, one password message back.
//! There is no server-identity verification in this sub-protocol; a later
//! rejection arrives as an ordinary server error, not from this layer.

use crate::error::{PgAuthError, Result};

/// Build the legacy password-message payload from the broker-computed
/// digest: literally `"md5" + hex_digest + NUL`.
///
/// # Errors
/// `Auth` if the credential source returned malformed data (wrong length,
/// non-hex, or uppercase characters).
pub fn legacy_response(hash_hex: &str) -> Result<Vec<u8>> {
    if hash_hex.len() != 32
        || !hash_hex
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        return Err(PgAuthError::Auth(
            "credential source returned a malformed md5 digest".into(),
        ));
    }

    let mut out = Vec::with_capacity(3 + 32 + 1);
    out.extend_from_slice(b"md5");
    out.extend_from_slice(hash_hex.as_bytes());
    out.push(0);
    Ok(out)
}

/// The double-MD5 a broker performs for the legacy method:
/// `md5(md5(password || user) || salt)`, lowercase hex, no prefix.
pub fn postgres_md5_hash(password: &str, user: &str, salt: &[u8; 4]) -> String {
    fn md5_hex(bytes: &[u8]) -> String {
        format!("{:x}", md5::compute(bytes))
    }
    let inner = md5_hex(format!("{password}{user}").as_bytes());
    let mut outer = Vec::with_capacity(inner.len() + 4);
    outer.extend_from_slice(inner.as_bytes());
    outer.extend_from_slice(salt);
    md5_hex(&outer)
}
