//! Cached configuration store

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{default_document, deep_merge, SettingsDocument};
use crate::error::{StoreError, StoreResult};

/// Durable home of the configuration document
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Load the persisted document, `None` if nothing has been stored yet
    async fn load(&self) -> StoreResult<Option<Value>>;

    /// Replace the persisted document
    async fn save(&self, document: &Value) -> StoreResult<()>;

    /// Store `document` only if no document exists yet
    async fn seed(&self, document: &Value) -> StoreResult<()>;
}

/// Read-through cache over a [`SettingsRepository`].
///
/// Every cache fill merges the persisted document over the compiled-in
/// defaults, so callers never observe a missing default key. Writes persist
/// the document verbatim and clear the cache before returning.
pub struct SettingsStore {
    repository: Arc<dyn SettingsRepository>,
    defaults: Arc<Value>,
    cache: RwLock<Option<Arc<SettingsDocument>>>,
    /// Bumped on every invalidation; a fill that started under an older
    /// generation must not be cached.
    generation: AtomicU64,
}

impl SettingsStore {
    pub fn new(repository: Arc<dyn SettingsRepository>) -> Self {
        Self::with_defaults(repository, default_document())
    }

    pub fn with_defaults(repository: Arc<dyn SettingsRepository>, defaults: Value) -> Self {
        Self {
            repository,
            defaults: Arc::new(defaults),
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    /// Effective configuration document.
    ///
    /// Never fails: if storage is unreachable the compiled-in defaults are
    /// served (and not cached, so recovery is picked up on the next call).
    pub async fn get(&self) -> Arc<SettingsDocument> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return cached.clone();
        }

        let generation = self.generation.load(Ordering::Acquire);

        match self.load_effective().await {
            Ok(document) => {
                let document = Arc::new(document);
                let mut cache = self.cache.write().await;
                if self.generation.load(Ordering::Acquire) == generation {
                    *cache = Some(document.clone());
                } else {
                    tracing::debug!("Settings changed during cache fill, not caching");
                }
                document
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    error_kind = "ConfigurationUnavailable",
                    "Settings storage unavailable, serving compiled-in defaults"
                );
                Arc::new(SettingsDocument::new(self.defaults.as_ref().clone()))
            }
        }
    }

    /// Persist a new document verbatim and invalidate the cache
    pub async fn put(&self, document: Value) -> StoreResult<()> {
        if !document.is_object() {
            return Err(StoreError::Corrupt(
                "settings document must be a JSON object".to_string(),
            ));
        }

        self.repository.save(&document).await?;
        self.invalidate().await;

        tracing::info!("Settings document updated, cache invalidated");
        Ok(())
    }

    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        *cache = None;
    }

    async fn load_effective(&self) -> StoreResult<SettingsDocument> {
        let merged = match self.repository.load().await? {
            Some(persisted) if persisted.is_object() => deep_merge(&self.defaults, &persisted),
            Some(_) => {
                tracing::warn!("Persisted settings document is not an object, using defaults");
                self.defaults.as_ref().clone()
            }
            None => {
                tracing::info!("No settings document found, seeding defaults");
                self.repository.seed(&self.defaults).await?;
                self.defaults.as_ref().clone()
            }
        };

        Ok(SettingsDocument::new(merged))
    }
}

// =============================================================================
// Postgres
// =============================================================================

#[derive(Clone)]
pub struct PgSettingsRepository {
    pool: PgPool,
}

impl PgSettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for PgSettingsRepository {
    async fn load(&self) -> StoreResult<Option<Value>> {
        let row: Option<(Json<Value>,)> =
            sqlx::query_as("SELECT document FROM settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(document),)| document))
    }

    async fn save(&self, document: &Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (id, document, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE SET
                document = EXCLUDED.document,
                updated_at = NOW()
            "#,
        )
        .bind(Json(document))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn seed(&self, document: &Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (id, document, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Json(document))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// In-process settings storage with a switch to simulate an outage
#[derive(Debug, Default)]
pub struct MemorySettingsRepository {
    document: std::sync::RwLock<Option<Value>>,
    unavailable: AtomicBool,
    loads: AtomicUsize,
}

impl MemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: Value) -> Self {
        let repo = Self::default();
        *repo.write_slot() = Some(document);
        repo
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `load` calls that reached storage
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<Value> {
        self.document
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Option<Value>> {
        self.document
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "settings storage offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn load(&self) -> StoreResult<Option<Value>> {
        self.check_available()?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored())
    }

    async fn save(&self, document: &Value) -> StoreResult<()> {
        self.check_available()?;
        *self.write_slot() = Some(document.clone());
        Ok(())
    }

    async fn seed(&self, document: &Value) -> StoreResult<()> {
        self.check_available()?;
        let mut slot = self.write_slot();
        if slot.is_none() {
            *slot = Some(document.clone());
        }
        Ok(())
    }
}
