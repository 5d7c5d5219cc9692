use async_trait::async_trait;

use super::types::StorageError;

/// Asynchronous string key/value persistence.
///
/// Absent keys read as `Ok(None)`. Implementations do not interpret values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
