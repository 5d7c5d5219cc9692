use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::kv::KeyValueStore;
use super::types::StorageError;

/// In-process [`KeyValueStore`].
///
/// Writes to a key can be made to fail with [`fail_next_writes`]; a failing
/// write leaves half of the new value behind before erroring, like a write
/// torn by a crash.
///
/// [`fail_next_writes`]: MemoryStorage::fail_next_writes
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes to `key` fail.
    pub fn fail_next_writes(&self, key: &str, count: usize) {
        lock(&self.failures).insert(key.to_string(), count);
    }

    /// Raw stored value, bypassing any decoding.
    pub fn raw(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    /// Stores `value` verbatim without triggering failure injection.
    pub fn insert_raw(&self, key: &str, value: &str) {
        lock(&self.entries).insert(key.to_string(), value.to_string());
    }

    fn take_failure(&self, key: &str) -> bool {
        let mut failures = lock(&self.failures);
        match failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.take_failure(key) {
            let mut cut = value.len() / 2;
            while !value.is_char_boundary(cut) {
                cut -= 1;
            }
            self.insert_raw(key, &value[..cut]);
            return Err(StorageError::Write {
                key: key.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }

        self.insert_raw(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}
