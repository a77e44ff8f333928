//! Structural JWT decoding.
//!
//! Signatures are not verified; the backend issuing the token is trusted
//! over TLS. Only the payload is read, for identity and expiry.

use crate::AuthUser;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

/// Why a token could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 3 token segments, found {0}")]
    Segments(usize),

    #[error("payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid token payload: {0}")]
    Payload(String),

    #[error("token has no exp claim")]
    MissingExpiry,
}

/// Claims extracted from an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub user: AuthUser,
    /// `exp` claim, unix seconds.
    pub expires_at: i64,
}

impl DecodedToken {
    /// A token is valid only while `exp > now`; `exp == now` is expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Decode the payload of a compact JWS.
pub fn decode(token: &str) -> Result<DecodedToken, DecodeError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::Segments(segments.len()));
    }

    // Some issuers pad; base64url in JWTs is specified without padding.
    let bytes = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('='))?;
    let payload: Value =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Payload(e.to_string()))?;
    let Value::Object(mut claims) = payload else {
        return Err(DecodeError::Payload("not a JSON object".to_string()));
    };

    let expires_at = claims
        .remove("exp")
        .and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|f| f.floor() as i64)))
        .ok_or(DecodeError::MissingExpiry)?;

    if claims.contains_key("id") {
        claims.remove("sub");
    }

    let mut user: AuthUser = serde_json::from_value(Value::Object(claims))
        .map_err(|e| DecodeError::Payload(e.to_string()))?;
    user.exp = Some(expires_at);

    Ok(DecodedToken { user, expires_at })
}
