use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::TabId;

/// A single mutation of the persisted key/value store, as seen by other tabs.
///
/// Notes:
/// - `origin` is the tab that performed the write. Subscribers ignore their own
///   writes, the same way a browser never fires `storage` in the writing tab.
/// - `new_value == None` means the key was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
    origin: TabId,
    key: String,
    old_value: Option<String>,
    new_value: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl StorageChange {
    pub fn new(
        origin: TabId,
        key: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            origin,
            key: key.into(),
            old_value,
            new_value,
            occurred_at,
        }
    }

    pub fn origin(&self) -> TabId {
        self.origin
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn old_value(&self) -> Option<&str> {
        self.old_value.as_deref()
    }

    pub fn new_value(&self) -> Option<&str> {
        self.new_value.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// True if the key was deleted by this change.
    pub fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }

    /// True if the change was made by `tab`.
    pub fn is_from(&self, tab: TabId) -> bool {
        self.origin == tab
    }
}
