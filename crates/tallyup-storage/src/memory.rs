//! In-process storage backend.

use crate::{SecureStorage, StorageResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// Non-durable storage kept in process memory.
///
/// Nothing survives a restart, so this backend is only suitable for tests
/// and for sessions that are deliberately ephemeral.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.remove(key).is_some())
    }
}
