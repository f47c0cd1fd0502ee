//! Tenant-scoped cache of derived query data.
//!
//! Views cache what they fetched under `(tenant, query key)`. Logout drops
//! everything; a tenant switch drops the tenant that was left.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use procura_core::TenantId;

#[derive(Debug, Clone)]
struct CachedEntry {
    data: Value,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    inner: RwLock<HashMap<(TenantId, String), CachedEntry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T>(&self, tenant_id: &TenantId, key: &str, model: &T) -> Result<(), serde_json::Error>
    where
        T: Serialize,
    {
        let data = serde_json::to_value(model)?;
        let entry = CachedEntry {
            data,
            cached_at: Utc::now(),
        };

        match self.inner.write() {
            Ok(mut guard) => {
                guard.insert((tenant_id.clone(), key.to_string()), entry);
            }
            Err(_) => tracing::error!("query cache lock poisoned; dropping {key}"),
        }
        Ok(())
    }

    /// Cached value, unless it is older than `max_age`.
    pub fn get<T>(&self, tenant_id: &TenantId, key: &str, max_age: Option<Duration>) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let guard = self.inner.read().ok()?;
        let entry = guard.get(&(tenant_id.clone(), key.to_string()))?;

        if let Some(max) = max_age {
            if Utc::now().signed_duration_since(entry.cached_at) > max {
                return None;
            }
        }

        match serde_json::from_value(entry.data.clone()) {
            Ok(model) => Some(model),
            Err(err) => {
                tracing::warn!("cached {key} does not match requested type: {err}");
                None
            }
        }
    }

    pub fn clear_tenant(&self, tenant_id: &TenantId) {
        if let Ok(mut guard) = self.inner.write() {
            guard.retain(|(tenant, _), _| tenant != tenant_id);
        }
    }

    pub fn clear_all(&self) {
        if let Ok(mut guard) = self.inner.write() {
            guard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
