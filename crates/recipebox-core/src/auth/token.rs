//! Access token inspection.
//!
//! Tokens are JWTs; only the `exp` claim is read. The signature is not
//! verified here, the server does that.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Expiry of a JWT in milliseconds since the epoch.
///
/// Returns `None` when the token does not have exactly three segments, the
/// payload is not base64url-encoded JSON, or `exp` is missing, not a
/// number, or too large to express in milliseconds.
pub fn expiration_millis(token: &str) -> Option<i64> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&payload).ok()?;
    let millis = claims.get("exp")?.as_f64()? * 1000.0;
    if !millis.is_finite() || millis < i64::MIN as f64 || millis >= i64::MAX as f64 {
        return None;
    }

    Some(millis as i64)
}

#[cfg(test)]
pub(crate) fn make_jwt(exp_secs: i64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"token_type":"access","exp":{}}}"#, exp_secs));
    format!("eyJhbGciOiJIUzI1NiJ9.{}.c2lnbmF0dXJl", payload)
}
