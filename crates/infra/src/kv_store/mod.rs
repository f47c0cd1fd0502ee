//! Persisted key/value store boundary.
//!
//! This is the one piece of state every tab shares. Values are opaque strings,
//! exactly like browser `localStorage`; callers own their encoding.

pub mod in_memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("failed to notify other tabs: {0}")]
    Notify(String),
}

/// String-to-string store shared by every tab of the application.
///
/// Writers get the previous value back so the caller can tell a real change
/// from a no-op (no-ops must not notify other tabs).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite `key`, returning the previous value.
    async fn set(&self, key: &str, value: &str) -> Result<Option<String>, StorageError>;

    /// Delete `key`, returning the removed value.
    async fn remove(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// All keys currently present, sorted.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

#[async_trait]
impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<Option<String>, StorageError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).keys().await
    }
}
