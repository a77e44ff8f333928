//! Storage trait definitions.

use crate::StorageResult;

/// Trait for secure storage backends.
///
/// Implementations must persist values in an encrypted, per-user location.
/// Each key is written atomically; there is no multi-key transaction.
pub trait SecureStorage: Send + Sync {
    /// Store a value securely, replacing any existing value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns false if nothing was stored.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
