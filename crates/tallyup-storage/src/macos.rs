//! macOS Keychain backend.

use crate::{SecureStorage, StorageError, StorageResult};
use security_framework::item::{ItemClass, ItemSearchOptions, Limit, SearchResult};
use security_framework::passwords::{delete_generic_password, set_generic_password};
use tracing::debug;

/// errSecItemNotFound
const ITEM_NOT_FOUND: &str = "-25300";

/// Generic-password Keychain items, one per key, under a shared service name.
pub struct KeychainStorage {
    service_name: String,
}

impl KeychainStorage {
    pub fn new(service_name: &str) -> StorageResult<Self> {
        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    fn is_not_found(message: &str) -> bool {
        let lower = message.to_lowercase();
        lower.contains("not found")
            || lower.contains("could not be found")
            || lower.contains(ITEM_NOT_FOUND)
    }

    fn find(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut search = ItemSearchOptions::new();
        search
            .class(ItemClass::generic_password())
            .service(&self.service_name)
            .account(key)
            .limit(Limit::Max(1))
            .load_data(true);

        match search.search() {
            Ok(results) => match results.into_iter().next() {
                Some(SearchResult::Data(data)) => Ok(Some(data)),
                _ => Ok(None),
            },
            Err(e) if Self::is_not_found(&e.to_string()) => Ok(None),
            Err(e) => Err(StorageError::Platform(format!(
                "Failed to read keychain item: {}",
                e
            ))),
        }
    }
}

impl SecureStorage for KeychainStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(service = %self.service_name, key = %key, "Writing keychain item");

        // set_generic_password fails on duplicates, so replace explicitly.
        let _ = delete_generic_password(&self.service_name, key);

        set_generic_password(&self.service_name, key, value.as_bytes())
            .map_err(|e| StorageError::Platform(format!("Failed to write keychain item: {}", e)))
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        debug!(service = %self.service_name, key = %key, "Reading keychain item");

        match self.find(key)? {
            Some(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|e| StorageError::Encoding(e.to_string())),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(service = %self.service_name, key = %key, "Deleting keychain item");

        match delete_generic_password(&self.service_name, key) {
            Ok(()) => Ok(true),
            Err(e) if Self::is_not_found(&e.to_string()) => Ok(false),
            Err(e) => Err(StorageError::Platform(format!(
                "Failed to delete keychain item: {}",
                e
            ))),
        }
    }
}
