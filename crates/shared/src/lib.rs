// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Pointgate shared crate
//!
//! Domain identifiers, the account repository, the configuration document
//! store and database plumbing used by both the billing and API crates.

pub mod accounts;
pub mod db;
pub mod error;
pub mod settings;
pub mod types;

pub use accounts::{
    AccountCell, AccountCredentials, AccountRecord, AccountRepository, MemoryAccounts, NewAccount,
    PgAccountRepository,
};
pub use db::{create_migration_pool, create_pool, run_migrations};
pub use error::{StoreError, StoreResult};
pub use settings::{
    deep_merge, default_document, CostTable, MaintenanceSettings, MemorySettingsRepository,
    ModelCatalog, PgSettingsRepository, PointPackage, RewardSettings, SettingsDocument,
    SettingsRepository, SettingsStore, StoreCatalog,
};
pub use types::{AccountSnapshot, AccountStatus, Privilege, UserId};
