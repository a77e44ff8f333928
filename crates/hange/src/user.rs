//! Authenticated user identity.

use serde::{Deserialize, Serialize};

/// Identity claims carried by the access token (native) or returned by
/// session introspection (web).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(alias = "sub")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Access token expiry (unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Web session cookie expiry (unix seconds).
    #[serde(
        default,
        rename = "cookieExpiration",
        alias = "cookie_expiration",
        skip_serializing_if = "Option::is_none"
    )]
    pub cookie_expiration: Option<i64>,
}
