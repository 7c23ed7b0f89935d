//! Ledger accessor
//!
//! The only code that changes a user's balance. A metered call goes through
//! [`charge_and_run`]:
//!
//! 1. lock the account row and read the balance
//! 2. reject with `InsufficientBalance` if `balance < price` (work never runs)
//! 3. debit inside the open transaction
//! 4. run the work; roll back on error, commit on success
//!
//! The row lock is held for the duration of the work, so concurrent calls by
//! the same user are serialized and can never overspend. If the surrounding
//! future is dropped mid-call the open hold is dropped with it and the debit
//! rolls back.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use time::{Duration, OffsetDateTime};

use pointgate_shared::UserId;

use crate::error::{BillingError, BillingResult};

/// A credit to record alongside the balance change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditEntry {
    pub reason: String,
    /// Credits sharing a key are applied at most once
    pub idempotency_key: Option<String>,
}

impl CreditEntry {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            idempotency_key: None,
        }
    }

    pub fn idempotent(reason: &str, key: &str) -> Self {
        Self {
            reason: reason.to_string(),
            idempotency_key: Some(key.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied { balance: i64 },
    /// The idempotency key was already used; nothing changed
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardClaim {
    pub balance: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub next_claim_at: OffsetDateTime,
}

/// A locked, debited balance awaiting the outcome of the work it pays for
#[async_trait]
pub trait BalanceHold: Send {
    fn user_id(&self) -> UserId;

    fn balance_before(&self) -> i64;

    fn price(&self) -> i64;

    /// Make the debit visible and return the new balance
    async fn commit(self: Box<Self>) -> BillingResult<i64>;

    /// Discard the debit, leaving the balance as it was
    async fn release(self: Box<Self>);
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn balance(&self, user: UserId) -> BillingResult<i64>;

    /// Lock the account and debit `price`, or fail with `InsufficientBalance`
    async fn hold(&self, user: UserId, price: i64) -> BillingResult<Box<dyn BalanceHold>>;

    async fn credit(
        &self,
        user: UserId,
        points: i64,
        entry: CreditEntry,
    ) -> BillingResult<CreditOutcome>;

    /// Administrative correction; refuses to take the balance below zero
    async fn adjust(&self, user: UserId, delta: i64, reason: &str) -> BillingResult<i64>;

    async fn claim_reward(
        &self,
        user: UserId,
        points: i64,
        cooldown: Duration,
        now: OffsetDateTime,
    ) -> BillingResult<RewardClaim>;
}

/// Result of work that was paid for
#[derive(Debug, Clone, PartialEq)]
pub struct Charged<T> {
    pub outcome: T,
    pub balance: i64,
}

/// Why a charged call did not complete
#[derive(Debug)]
pub enum ChargeError<E> {
    /// Rejected or failed before or after the work; the work error never lands here
    Ledger(BillingError),
    /// The work failed and the debit was rolled back
    Work { error: E, balance: i64 },
}

/// Debit `price` from `user` for the duration of `work`, keeping it only if
/// `work` succeeds.
pub async fn charge_and_run<T, E, F, Fut>(
    ledger: &dyn Ledger,
    user: UserId,
    price: i64,
    work: F,
) -> Result<Charged<T>, ChargeError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if price < 0 {
        return Err(ChargeError::Ledger(BillingError::InvalidAmount(format!(
            "price must not be negative, got {price}"
        ))));
    }

    let hold = ledger.hold(user, price).await.map_err(ChargeError::Ledger)?;
    let balance_before = hold.balance_before();

    match work().await {
        Ok(outcome) => {
            let balance = hold.commit().await.map_err(ChargeError::Ledger)?;
            tracing::debug!(user_id = %user, price, balance, "Charge committed");
            Ok(Charged { outcome, balance })
        }
        Err(error) => {
            hold.release().await;
            tracing::debug!(user_id = %user, price, "Charge released after failed work");
            Err(ChargeError::Work {
                error,
                balance: balance_before,
            })
        }
    }
}

fn checked_credit(balance: i64, points: i64) -> BillingResult<i64> {
    balance
        .checked_add(points)
        .ok_or_else(|| BillingError::InvalidAmount(format!("balance overflow adding {points}")))
}

// =============================================================================
// Postgres
// =============================================================================

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_balance(
        tx: &mut Transaction<'static, Postgres>,
        user: UserId,
    ) -> BillingResult<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user.get())
                .fetch_optional(&mut **tx)
                .await?;

        row.map(|(balance,)| balance)
            .ok_or(BillingError::AccountNotFound(user))
    }

    async fn record_credit(
        tx: &mut Transaction<'static, Postgres>,
        user: UserId,
        points: i64,
        entry: &CreditEntry,
        balance_after: i64,
    ) -> BillingResult<bool> {
        let inserted: Option<(uuid::Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO ledger_credits (id, user_id, points, reason, idempotency_key, balance_after)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(user.get())
        .bind(points)
        .bind(&entry.reason)
        .bind(&entry.idempotency_key)
        .bind(balance_after)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(inserted.is_some())
    }

    async fn set_balance(
        tx: &mut Transaction<'static, Postgres>,
        user: UserId,
        balance: i64,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE users SET balance = $1, updated_at = NOW() WHERE id = $2")
            .bind(balance)
            .bind(user.get())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

/// Open transaction holding the row lock and the uncommitted debit
struct PgHold {
    tx: Transaction<'static, Postgres>,
    user: UserId,
    balance_before: i64,
    price: i64,
}

#[async_trait]
impl BalanceHold for PgHold {
    fn user_id(&self) -> UserId {
        self.user
    }

    fn balance_before(&self) -> i64 {
        self.balance_before
    }

    fn price(&self) -> i64 {
        self.price
    }

    async fn commit(self: Box<Self>) -> BillingResult<i64> {
        let PgHold {
            tx,
            balance_before,
            price,
            ..
        } = *self;
        tx.commit().await?;
        Ok(balance_before - price)
    }

    async fn release(self: Box<Self>) {
        let PgHold { tx, user, .. } = *self;
        if let Err(e) = tx.rollback().await {
            // the connection is discarded and the server rolls back anyway
            tracing::warn!(user_id = %user, error = %e, "Rollback of balance hold failed");
        }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn balance(&self, user: UserId) -> BillingResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT balance FROM users WHERE id = $1")
            .bind(user.get())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(balance,)| balance)
            .ok_or(BillingError::AccountNotFound(user))
    }

    async fn hold(&self, user: UserId, price: i64) -> BillingResult<Box<dyn BalanceHold>> {
        let mut tx = self.pool.begin().await?;
        let balance = Self::lock_balance(&mut tx, user).await?;

        if balance < price {
            tx.rollback().await?;
            return Err(BillingError::InsufficientBalance { balance, price });
        }

        Self::set_balance(&mut tx, user, balance - price).await?;

        Ok(Box::new(PgHold {
            tx,
            user,
            balance_before: balance,
            price,
        }))
    }

    async fn credit(
        &self,
        user: UserId,
        points: i64,
        entry: CreditEntry,
    ) -> BillingResult<CreditOutcome> {
        if points <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credit must be positive, got {points}"
            )));
        }

        let mut tx = self.pool.begin().await?;
        let balance = Self::lock_balance(&mut tx, user).await?;
        let new_balance = checked_credit(balance, points)?;

        if !Self::record_credit(&mut tx, user, points, &entry, new_balance).await? {
            tx.rollback().await?;
            tracing::info!(
                user_id = %user,
                idempotency_key = ?entry.idempotency_key,
                "Duplicate credit ignored"
            );
            return Ok(CreditOutcome::Duplicate);
        }

        Self::set_balance(&mut tx, user, new_balance).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user,
            points,
            reason = %entry.reason,
            balance = new_balance,
            "Points credited"
        );

        Ok(CreditOutcome::Applied {
            balance: new_balance,
        })
    }

    async fn adjust(&self, user: UserId, delta: i64, reason: &str) -> BillingResult<i64> {
        if delta == 0 {
            return Err(BillingError::InvalidAmount(
                "adjustment must be non-zero".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let balance = Self::lock_balance(&mut tx, user).await?;
        let new_balance = adjusted_balance(balance, delta)?;

        Self::record_credit(&mut tx, user, delta, &CreditEntry::new(reason), new_balance).await?;
        Self::set_balance(&mut tx, user, new_balance).await?;
        tx.commit().await?;

        tracing::info!(user_id = %user, delta, reason, balance = new_balance, "Balance adjusted");
        Ok(new_balance)
    }

    async fn claim_reward(
        &self,
        user: UserId,
        points: i64,
        cooldown: Duration,
        now: OffsetDateTime,
    ) -> BillingResult<RewardClaim> {
        check_reward_points(points)?;
        let mut tx = self.pool.begin().await?;
        let row: Option<(i64, Option<OffsetDateTime>)> = sqlx::query_as(
            "SELECT balance, last_reward_claim FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user.get())
        .fetch_optional(&mut *tx)
        .await?;

        let (balance, last_claim) = row.ok_or(BillingError::AccountNotFound(user))?;
        check_cooldown(last_claim, cooldown, now)?;

        let new_balance = checked_credit(balance, points)?;
        if points > 0 {
            Self::record_credit(
                &mut tx,
                user,
                points,
                &CreditEntry::new("daily_reward"),
                new_balance,
            )
            .await?;
        }

        sqlx::query(
            "UPDATE users SET balance = $1, last_reward_claim = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(new_balance)
        .bind(now)
        .bind(user.get())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(RewardClaim {
            balance: new_balance,
            next_claim_at: now + cooldown,
        })
    }
}

pub(crate) fn adjusted_balance(balance: i64, delta: i64) -> BillingResult<i64> {
    let new_balance = balance
        .checked_add(delta)
        .ok_or_else(|| BillingError::InvalidAmount(format!("balance overflow adding {delta}")))?;
    if new_balance < 0 {
        return Err(BillingError::InvalidAmount(format!(
            "adjustment of {delta} would take balance {balance} below zero"
        )));
    }
    Ok(new_balance)
}

pub(crate) fn check_reward_points(points: i64) -> BillingResult<()> {
    if points < 0 {
        return Err(BillingError::InvalidAmount(format!(
            "reward must not be negative, got {points}"
        )));
    }
    Ok(())
}

pub(crate) fn check_cooldown(
    last_claim: Option<OffsetDateTime>,
    cooldown: Duration,
    now: OffsetDateTime,
) -> BillingResult<()> {
    match last_claim {
        Some(last) if now < last + cooldown => Err(BillingError::RewardOnCooldown {
            next_claim_at: last + cooldown,
        }),
        _ => Ok(()),
    }
}
