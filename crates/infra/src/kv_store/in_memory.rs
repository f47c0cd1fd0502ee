use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{KeyValueStore, StorageError};

/// In-memory store for tests/dev and for `:memory:` configurations.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.inner.read().map_err(|_| StorageError::Poisoned)?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<Option<String>, StorageError> {
        let mut guard = self.inner.write().map_err(|_| StorageError::Poisoned)?;
        Ok(guard.insert(key.to_string(), value.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut guard = self.inner.write().map_err(|_| StorageError::Poisoned)?;
        Ok(guard.remove(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let guard = self.inner.read().map_err(|_| StorageError::Poisoned)?;
        Ok(guard.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_remove_report_previous_values() {
        let store = InMemoryStore::new();

        assert_eq!(store.set("access_token", "t1").await.unwrap(), None);
        assert_eq!(store.set("access_token", "t2").await.unwrap(), Some("t1".into()));
        assert_eq!(store.get("access_token").await.unwrap(), Some("t2".into()));

        assert_eq!(store.remove("access_token").await.unwrap(), Some("t2".into()));
        assert_eq!(store.remove("access_token").await.unwrap(), None);
        assert!(store.keys().await.unwrap().is_empty());
    }
}
