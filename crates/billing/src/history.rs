//! Generation history
//!
//! One row per successful metered call. Recording is best-effort: the charge
//! has already committed when history is written.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use pointgate_shared::UserId;

use crate::error::BillingResult;
use crate::pricing::OperationKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: String,
    pub model: String,
    pub price: i64,
    pub balance_after: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl GenerationRecord {
    pub fn new(
        user_id: UserId,
        kind: OperationKind,
        model: &str,
        price: i64,
        balance_after: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.as_str().to_string(),
            model: model.to_string(),
            price,
            balance_after,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, entry: GenerationRecord) -> BillingResult<()>;
}

#[derive(Clone)]
pub struct PgHistory {
    pool: PgPool,
}

impl PgHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistorySink for PgHistory {
    async fn record(&self, entry: GenerationRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_history (id, user_id, kind, model, price, balance_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id.get())
        .bind(&entry.kind)
        .bind(&entry.model)
        .bind(entry.price)
        .bind(entry.balance_after)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<GenerationRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<GenerationRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record(&self, entry: GenerationRecord) -> BillingResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
        Ok(())
    }
}
