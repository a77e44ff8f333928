//! Linux Secret Service backend.

use crate::{SecureStorage, StorageError, StorageResult};
use secret_service::{blocking::SecretService, EncryptionType};
use std::collections::HashMap;
use tracing::debug;

/// Secrets in the default collection, tagged with `service` and `key` attributes.
pub struct SecretServiceStorage {
    service_name: String,
}

impl SecretServiceStorage {
    pub fn new(service_name: &str) -> StorageResult<Self> {
        // Fail early when no Secret Service is reachable on the session bus.
        SecretService::connect(EncryptionType::Dh).map_err(|e| {
            StorageError::Platform(format!("Failed to connect to Secret Service: {}", e))
        })?;

        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    fn with_collection<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&secret_service::blocking::Collection) -> StorageResult<T>,
    {
        let ss = SecretService::connect(EncryptionType::Dh)
            .map_err(|e| StorageError::Platform(e.to_string()))?;

        let collection = ss
            .get_default_collection()
            .map_err(|e| StorageError::Platform(e.to_string()))?;

        if collection.is_locked().unwrap_or(false) {
            collection.unlock().map_err(|e| {
                StorageError::Platform(format!("Failed to unlock collection: {}", e))
            })?;
        }

        f(&collection)
    }

    fn attributes<'a>(&'a self, key: &'a str) -> HashMap<&'a str, &'a str> {
        HashMap::from([("service", self.service_name.as_str()), ("key", key)])
    }
}

impl SecureStorage for SecretServiceStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(service = %self.service_name, key = %key, "Writing secret");

        self.with_collection(|collection| {
            let label = format!("{}/{}", self.service_name, key);
            collection
                .create_item(&label, self.attributes(key), value.as_bytes(), true, "text/plain")
                .map_err(|e| StorageError::Platform(e.to_string()))?;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        debug!(service = %self.service_name, key = %key, "Reading secret");

        self.with_collection(|collection| {
            let items = collection
                .search_items(self.attributes(key))
                .map_err(|e| StorageError::Platform(e.to_string()))?;

            let Some(item) = items.first() else {
                return Ok(None);
            };

            let secret = item
                .get_secret()
                .map_err(|e| StorageError::Platform(e.to_string()))?;

            String::from_utf8(secret)
                .map(Some)
                .map_err(|e| StorageError::Encoding(e.to_string()))
        })
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(service = %self.service_name, key = %key, "Deleting secret");

        self.with_collection(|collection| {
            let items = collection
                .search_items(self.attributes(key))
                .map_err(|e| StorageError::Platform(e.to_string()))?;

            let Some(item) = items.first() else {
                return Ok(false);
            };

            item.delete()
                .map_err(|e| StorageError::Platform(e.to_string()))?;
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SERVICE: &str = "com.tallyup.app.test";

    #[test]
    #[ignore] // Requires Linux Secret Service (D-Bus)
    fn test_secret_service_token_roundtrip() {
        let storage = SecretServiceStorage::new(TEST_SERVICE).unwrap();
        let _ = storage.delete("refreshToken");

        storage.set("refreshToken", "refresh-1").unwrap();
        assert_eq!(
            storage.get("refreshToken").unwrap().as_deref(),
            Some("refresh-1")
        );

        storage.set("refreshToken", "refresh-2").unwrap();
        assert_eq!(
            storage.get("refreshToken").unwrap().as_deref(),
            Some("refresh-2")
        );

        assert!(storage.delete("refreshToken").unwrap());
        assert!(!storage.delete("refreshToken").unwrap());
    }
}
