//! Token-level API over a secure storage backend.

use crate::{SecureStorage, StorageResult};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// The two logical entries the session manager persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenName {
    AccessToken,
    RefreshToken,
}

impl TokenName {
    /// Storage key, shared with the mobile app's secure-store layout.
    pub const fn key(self) -> &'static str {
        match self {
            TokenName::AccessToken => "accessToken",
            TokenName::RefreshToken => "refreshToken",
        }
    }

    pub const ALL: [TokenName; 2] = [TokenName::AccessToken, TokenName::RefreshToken];
}

impl fmt::Display for TokenName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Persists the raw access and refresh tokens.
///
/// Reads never fail: a backend error is logged and reported as "no token",
/// since a missing token only means the user has to sign in again.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn SecureStorage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Read a token, treating backend errors as absence.
    pub fn get_token(&self, name: TokenName) -> Option<String> {
        match self.storage.get(name.key()) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(token = %name, error = %e, "Secure store read failed, treating as missing");
                None
            }
        }
    }

    /// Durably write a token.
    pub fn save_token(&self, name: TokenName, value: &str) -> StorageResult<()> {
        debug!(token = %name, "Saving token");
        self.storage.set(name.key(), value)
    }

    /// Remove a token. Returns false if it was not stored.
    pub fn delete_token(&self, name: TokenName) -> StorageResult<bool> {
        debug!(token = %name, "Deleting token");
        self.storage.delete(name.key())
    }

    /// Remove both tokens, attempting each even if the first delete fails.
    pub fn clear(&self) -> StorageResult<()> {
        let mut first_error = None;
        for name in TokenName::ALL {
            if let Err(e) = self.delete_token(name) {
                warn!(token = %name, error = %e, "Failed to delete token");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl From<Box<dyn SecureStorage>> for TokenStore {
    fn from(storage: Box<dyn SecureStorage>) -> Self {
        Self::new(Arc::from(storage))
    }
}
