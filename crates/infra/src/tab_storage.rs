//! Per-tab view of the shared store.
//!
//! Every write goes to the store first and is published to the other tabs
//! only after it succeeded. Writes that change nothing (same value, or removal
//! of an absent key) publish nothing, which is what keeps two tabs reacting to
//! each other from ping-ponging forever.

use std::sync::Arc;

use chrono::Utc;

use procura_core::TabId;
use procura_events::{ChangeBus, InMemoryChangeBus, StorageChange, Subscription};

use crate::kv_store::{KeyValueStore, StorageError};

/// Store + notification channel shared by all tabs of one origin.
#[derive(Clone)]
pub struct SharedStorage {
    store: Arc<dyn KeyValueStore>,
    bus: Arc<InMemoryChangeBus<StorageChange>>,
}

impl SharedStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            bus: Arc::new(InMemoryChangeBus::new()),
        }
    }

    /// Open a handle for a new tab.
    pub fn open_tab(&self) -> TabStorage {
        TabStorage {
            tab: TabId::new(),
            store: self.store.clone(),
            bus: self.bus.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

/// One tab's handle on the shared store.
#[derive(Clone)]
pub struct TabStorage {
    tab: TabId,
    store: Arc<dyn KeyValueStore>,
    bus: Arc<InMemoryChangeBus<StorageChange>>,
}

impl TabStorage {
    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.store.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let previous = self.store.set(key, value).await?;
        if previous.as_deref() == Some(value) {
            return Ok(());
        }

        tracing::debug!(tab = %self.tab, key, "storage write");
        self.publish(key, previous, Some(value.to_string()))
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let Some(previous) = self.store.remove(key).await? else {
            return Ok(());
        };

        tracing::debug!(tab = %self.tab, key, "storage removal");
        self.publish(key, Some(previous), None)
    }

    /// Subscribe to every change on the shared store, this tab's included.
    ///
    /// Consumers drop changes whose origin is their own tab.
    pub fn subscribe(&self) -> Subscription<StorageChange> {
        self.bus.subscribe()
    }

    fn publish(
        &self,
        key: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Result<(), StorageError> {
        let change = StorageChange::new(self.tab, key, old_value, new_value, Utc::now());
        self.bus
            .publish(change)
            .map_err(|err| StorageError::Notify(format!("{err:?}")))
    }
}

impl core::fmt::Debug for TabStorage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TabStorage").field("tab", &self.tab).finish_non_exhaustive()
    }
}
