mod backup;
mod db;
mod kv;
mod memory;
mod store;
mod types;

pub use backup::{backup_key, BackupStorage, BACKUP_SUFFIX};
pub use db::{Database, MEMORY_PATH};
pub use kv::KeyValueStore;
pub use memory::MemoryStorage;
pub use store::{Store, ARTICLES_KEY, FEEDS_KEY, READ_LATER_KEY};
pub use types::{
    Article, ArticleMerge, DatabaseError, Feed, ReadLaterError, Snapshot, StorageError,
    StoreError,
};
