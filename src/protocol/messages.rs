//! Parsing of authentication-phase backend messages.

use bytes::Buf;

use crate::error::{PgAuthError, Result};

// Authentication request codes, from src/include/libpq/pqcomm.h.
pub const AUTH_OK: i32 = 0;
pub const AUTH_MD5: i32 = 5;
pub const AUTH_SASL: i32 = 10;
pub const AUTH_SASL_CONTINUE: i32 = 11;
pub const AUTH_SASL_FINAL: i32 = 12;

/// Split an 'R' (authentication request) payload into its code and the
/// method-specific remainder (salt, mechanism list, SASL data).
pub fn parse_auth_request(payload: &[u8]) -> Result<(i32, &[u8])> {
    if payload.len() < 4 {
        return Err(PgAuthError::Protocol("auth request too short".into()));
    }
    let mut b = payload;
    let code = b.get_i32();
    Ok((code, b))
}

/// Extract a human-readable message (plus SQLSTATE if present) from an 'E'
/// (ErrorResponse) payload. Fields are `(code_byte, cstring)*` then NUL.
pub fn parse_error_response(payload: &[u8]) -> String {
    let mut b = payload;
    let mut msg = None;
    let mut sqlstate = None;

    while !b.is_empty() {
        let code = b[0];
        b = &b[1..];
        if code == 0 {
            break;
        }
        if let Some(pos) = b.iter().position(|&x| x == 0) {
            let s = String::from_utf8_lossy(&b[..pos]).to_string();
            if code == b'M' {
                msg = Some(s);
            } else if code == b'C' {
                sqlstate = Some(s);
            }
            b = &b[pos + 1..];
        } else {
            break;
        }
    }

    match (msg, sqlstate) {
        (Some(m), Some(c)) => format!("{m} (SQLSTATE {c})"),
        (Some(m), None) => m,
        _ => "unknown server error".to_string(),
    }
}

/// Parse the NUL-separated mechanism list of an AuthenticationSASL request.
pub fn parse_sasl_mechanisms(rest: &[u8]) -> Vec<String> {
    let mut b = rest;
    let mut offered = Vec::new();
    while !b.is_empty() {
        if let Some(pos) = b.iter().position(|&x| x == 0) {
            if pos == 0 {
                break;
            }
            offered.push(String::from_utf8_lossy(&b[..pos]).to_string());
            b = &b[pos + 1..];
        } else {
            break;
        }
    }
    offered
}
