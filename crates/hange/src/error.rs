//! Session error types.

use crate::DecodeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Access token could not be decoded
    #[error("Token decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Refresh endpoint rejected the refresh credential
    #[error("Token refresh rejected: HTTP {status}")]
    RefreshRejected { status: u16 },

    /// No refresh credential to refresh with
    #[error("Not logged in")]
    NotLoggedIn,

    /// Provider returned an error from the authorization endpoint
    #[error("OAuth provider error: {0}")]
    OAuthProvider(String),

    /// Authorization code exchange or session introspection failed
    #[error("Token exchange failed: {0}")]
    Exchange(String),

    /// Local redirect machinery failed
    #[error("Redirect flow error: {0}")]
    Redirect(#[from] auth_redirect::RedirectError),

    /// Secure storage error
    #[error("Storage error: {0}")]
    Storage(#[from] tallyup_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Network unavailable (transient error, can retry)
    #[error("Network unavailable: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Header value could not be built from a token
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Coarse classification of an [`AuthError`], surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    Decode,
    RefreshFailure,
    NetworkError,
    OAuthProviderError,
    Exchange,
    Storage,
    Internal,
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::Decode(_) => AuthErrorKind::Decode,
            AuthError::RefreshRejected { .. } | AuthError::NotLoggedIn => {
                AuthErrorKind::RefreshFailure
            }
            AuthError::OAuthProvider(_) => AuthErrorKind::OAuthProviderError,
            AuthError::Exchange(_) | AuthError::Json(_) => AuthErrorKind::Exchange,
            AuthError::Storage(_) => AuthErrorKind::Storage,
            AuthError::Http(_) | AuthError::Network(_) | AuthError::Timeout => {
                AuthErrorKind::NetworkError
            }
            AuthError::Redirect(_) | AuthError::InvalidHeader(_) | AuthError::InvalidUrl(_) => {
                AuthErrorKind::Internal
            }
        }
    }

    /// Returns true if the backend was never reached and the session should be kept.
    ///
    /// Any HTTP response, 5xx included, is an answer from the backend and is
    /// classified by the caller instead.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) | AuthError::Timeout => true,
            AuthError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

/// The most recent auth failure, kept on the session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl From<&AuthError> for LastError {
    fn from(error: &AuthError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
