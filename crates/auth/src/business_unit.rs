use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use procura_core::{BuCode, Entity, TenantId, ValueObject};

/// Department a business unit belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: String,
    pub name: String,
}

/// Per-unit settings that tenant-scoped views read (currency, formats).
///
/// Keys the server sends beyond the known ones are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ValueObject for BuConfig {}

/// An organizational scope selecting dataset and configuration.
///
/// `id` is what the rest of the system calls the tenant id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessUnit {
    pub id: TenantId,
    pub code: BuCode,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
    #[serde(default)]
    pub config: BuConfig,
}

impl Entity for BusinessUnit {
    type Id = TenantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
