use serde::de::DeserializeOwned;
use serde::Serialize;

use super::kv::KeyValueStore;
use super::types::StorageError;

/// Suffix of the shadow copy kept alongside a primary key.
pub const BACKUP_SUFFIX: &str = "__backup";

pub fn backup_key(key: &str) -> String {
    format!("{key}{BACKUP_SUFFIX}")
}

/// JSON persistence with a shadow backup of the last committed value.
///
/// Every save first copies the current primary value to `<key>__backup`.
/// When the new write fails, the primary key is restored from that copy so
/// a torn write never leaves it worse off than before the save.
pub struct BackupStorage<S> {
    inner: S,
}

impl<S: KeyValueStore> BackupStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Loads and decodes `key`.
    ///
    /// Missing, unreadable and corrupt values all load as `None`; the latter
    /// two are logged.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.inner.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read stored value");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let e = StorageError::Corruption {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(key, error = %e, "Ignoring corrupt stored value");
                None
            }
        }
    }

    /// Encodes and writes `value` under `key`, shadowing the previous value.
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(value)?;
        let shadow = backup_key(key);

        match self.inner.get(key).await {
            // A corrupt primary must not overwrite a good shadow
            Ok(Some(previous)) if serde_json::from_str::<serde_json::Value>(&previous).is_ok() => {
                // The primary is only written once its shadow is current
                if let Err(e) = self.inner.set(&shadow, &previous).await {
                    tracing::error!(key, error = %e, "Failed to write shadow backup, aborting save");
                    return Err(e);
                }
            }
            Ok(Some(_)) => {
                tracing::warn!(key, "Primary value is corrupt, keeping existing shadow backup");
            }
            Ok(None) => {
                if let Err(e) = self.inner.remove(&shadow).await {
                    tracing::warn!(key, error = %e, "Failed to clear stale shadow backup");
                }
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read value before save");
            }
        }

        if let Err(e) = self.inner.set(key, &serialized).await {
            tracing::error!(key, error = %e, "Write failed, restoring from shadow backup");
            self.restore(key).await;
            return Err(e);
        }

        Ok(())
    }

    /// Copies the shadow backup of `key` back over the primary value.
    ///
    /// With no shadow the primary key is removed, returning it to its
    /// never-written state. Returns whether the restore succeeded.
    pub async fn restore(&self, key: &str) -> bool {
        let shadow = match self.inner.get(&backup_key(key)).await {
            Ok(shadow) => shadow,
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to read shadow backup");
                return false;
            }
        };

        let result = match shadow {
            Some(previous) => self.inner.set(key, &previous).await,
            None => self.inner.remove(key).await,
        };

        match result {
            Ok(()) => {
                tracing::info!(key, "Restored value from shadow backup");
                true
            }
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to restore from shadow backup");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_save_then_load() {
        let storage = BackupStorage::new(MemoryStorage::new());
        storage.save("items", &vec!["a", "b"]).await.unwrap();

        let loaded: Option<Vec<String>> = storage.load("items").await;
        assert_eq!(loaded, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn test_save_shadows_previous_value() {
        let storage = BackupStorage::new(MemoryStorage::new());
        storage.save("items", &vec![1]).await.unwrap();
        assert_eq!(storage.inner().raw("items__backup"), None);

        storage.save("items", &vec![1, 2]).await.unwrap();
        assert_eq!(storage.inner().raw("items__backup").as_deref(), Some("[1]"));
        assert_eq!(storage.inner().raw("items").as_deref(), Some("[1,2]"));
    }

    #[tokio::test]
    async fn test_failed_write_restores_previous_value() {
        let storage = BackupStorage::new(MemoryStorage::new());
        storage.save("items", &vec![1, 2, 3]).await.unwrap();

        storage.inner().fail_next_writes("items", 1);
        let result = storage.save("items", &vec![1, 2, 3, 4, 5, 6]).await;

        assert!(matches!(result, Err(StorageError::Write { .. })));
        let loaded: Option<Vec<u32>> = storage.load("items").await;
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_failed_shadow_write_keeps_primary() {
        let storage = BackupStorage::new(MemoryStorage::new());
        storage.save("items", &vec![1]).await.unwrap();
        storage.save("items", &vec![1, 2]).await.unwrap();

        storage.inner().fail_next_writes(&backup_key("items"), 1);
        let result = storage.save("items", &vec![9]).await;

        assert!(matches!(result, Err(StorageError::Write { .. })));
        assert_eq!(storage.inner().raw("items").as_deref(), Some("[1,2]"));
        let loaded: Option<Vec<u32>> = storage.load("items").await;
        assert_eq!(loaded, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_failed_first_write_leaves_key_absent() {
        let storage = BackupStorage::new(MemoryStorage::new());
        storage.inner().fail_next_writes("items", 1);

        assert!(storage.save("items", &vec![1, 2, 3]).await.is_err());
        assert_eq!(storage.inner().raw("items"), None);
    }

    #[tokio::test]
    async fn test_corrupt_value_loads_as_none() {
        let storage = BackupStorage::new(MemoryStorage::new());
        storage.inner().insert_raw("items", "[1, 2");

        let loaded: Option<Vec<u32>> = storage.load("items").await;
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn test_wrong_shape_loads_as_none() {
        let storage = BackupStorage::new(MemoryStorage::new());
        storage.inner().insert_raw("items", r#"{"not":"a list"}"#);

        let loaded: Option<Vec<u32>> = storage.load("items").await;
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn test_corrupt_primary_keeps_good_shadow() {
        let storage = BackupStorage::new(MemoryStorage::new());
        storage.inner().insert_raw("items__backup", "[7]");
        storage.inner().insert_raw("items", "garbage");

        storage.save("items", &vec![8]).await.unwrap();
        assert_eq!(storage.inner().raw("items__backup").as_deref(), Some("[7]"));
    }
}
