//! Infrastructure layer: persisted session storage and cross-tab notification.

pub mod kv_store;
pub mod tab_storage;

pub use kv_store::{InMemoryStore, KeyValueStore, SqliteStore, StorageError};
pub use tab_storage::{SharedStorage, TabStorage};
