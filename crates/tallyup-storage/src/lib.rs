//! Secure token storage for the Tallyup client.
//!
//! Tokens are kept in the platform's encrypted credential store:
//! - **macOS**: Keychain Access via `security-framework`
//! - **Linux**: Secret Service (GNOME Keyring / KWallet) via `secret-service`
//! - **Windows**: Credential Vault via `windows` crate
//!
//! [`TokenStore`] is the contract the session manager consumes: two logical
//! entries, `accessToken` and `refreshToken`, each holding the raw token.

mod memory;
mod token_store;
mod traits;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
mod windows;

pub use memory::MemoryStorage;
pub use token_store::{TokenName, TokenStore};
pub use traits::SecureStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Platform-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the platform-specific secure storage for `service_name`.
pub fn create_storage(service_name: &str) -> StorageResult<Box<dyn SecureStorage>> {
    #[cfg(target_os = "macos")]
    {
        let storage = macos::KeychainStorage::new(service_name)?;
        Ok(Box::new(storage))
    }

    #[cfg(target_os = "linux")]
    {
        let storage = linux::SecretServiceStorage::new(service_name)?;
        Ok(Box::new(storage))
    }

    #[cfg(target_os = "windows")]
    {
        let storage = windows::CredentialStorage::new(service_name)?;
        Ok(Box::new(storage))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = service_name;
        Err(StorageError::Platform(
            "No secure storage implementation available for this platform".to_string(),
        ))
    }
}

/// Create a [`TokenStore`] backed by the platform storage.
pub fn create_token_store(service_name: &str) -> StorageResult<TokenStore> {
    let storage = create_storage(service_name)?;
    Ok(TokenStore::new(storage.into()))
}
