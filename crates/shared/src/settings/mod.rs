//! Live-editable configuration document
//!
//! A single JSON document (pricing, store catalog, maintenance flag, theme and
//! content) persisted at `settings.id = 1`, served through [`SettingsStore`]
//! with defaults backfill and explicit cache invalidation.

mod defaults;
mod merge;
mod store;

pub use defaults::default_document;
pub use merge::deep_merge;
pub use store::{
    MemorySettingsRepository, PgSettingsRepository, SettingsRepository, SettingsStore,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};

/// Effective configuration document (persisted overrides merged over defaults)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SettingsDocument {
    value: Value,
}

impl SettingsDocument {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.value.get(name)
    }

    /// Deserialize a top-level section into a typed view
    pub fn view<T: DeserializeOwned>(&self, section: &str) -> StoreResult<T> {
        let value = self
            .section(section)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("missing settings section '{section}'")))?;
        serde_json::from_value(value)
            .map_err(|e| StoreError::Corrupt(format!("invalid settings section '{section}': {e}")))
    }

    /// Maintenance settings; an unreadable section is treated as "not in maintenance"
    pub fn maintenance(&self) -> MaintenanceSettings {
        self.view("maintenance").unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Maintenance section unreadable, treating as disabled");
            MaintenanceSettings::default()
        })
    }

    pub fn costs(&self) -> StoreResult<CostTable> {
        self.view("costs")
    }

    pub fn store_catalog(&self) -> StoreResult<StoreCatalog> {
        self.view("store")
    }

    pub fn rewards(&self) -> StoreResult<RewardSettings> {
        self.view("rewards")
    }

    pub fn models(&self) -> StoreResult<ModelCatalog> {
        self.view("models")
    }
}

/// Raw `costs` section. Values stay untyped so the resolver can tell a missing
/// key apart from a malformed one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostTable(BTreeMap<String, Value>);

impl CostTable {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Notice keyed by language code
    #[serde(default)]
    pub message: BTreeMap<String, String>,
    /// Paths reachable by anyone while maintenance is enabled
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

impl MaintenanceSettings {
    pub fn allows_path(&self, path: &str) -> bool {
        self.allowed_paths.iter().any(|allowed| allowed == path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCatalog {
    pub currency: String,
    pub packages: Vec<PointPackage>,
}

impl StoreCatalog {
    pub fn find(&self, package_id: &str) -> Option<&PointPackage> {
        self.packages.iter().find(|p| p.id == package_id)
    }
}

/// A purchasable bundle of points; `price` is in the currency's minor unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointPackage {
    pub id: String,
    pub points: i64,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSettings {
    pub daily_points: i64,
}

/// Models accepted per operation family; the first entry is the default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub image: Vec<String>,
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub speech: Vec<String>,
}
