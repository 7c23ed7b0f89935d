//! In-process ledger over [`MemoryAccounts`]
//!
//! Used by tests and by local runs without a database. The per-account row
//! lock stands in for `SELECT ... FOR UPDATE`; a hold only touches the record
//! when it commits, so an uncommitted debit is never observable.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};
use tokio::sync::OwnedMutexGuard;

use pointgate_shared::{AccountCell, MemoryAccounts, UserId};

use crate::error::{BillingError, BillingResult};
use crate::ledger::{
    adjusted_balance, check_cooldown, check_reward_points, BalanceHold, CreditEntry,
    CreditOutcome, Ledger, RewardClaim,
};

/// Credit recorded by [`MemoryLedger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRecord {
    pub user_id: UserId,
    pub points: i64,
    pub reason: String,
    pub balance_after: i64,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Arc<MemoryAccounts>,
    idempotency_keys: Mutex<HashSet<String>>,
    credits: Mutex<Vec<CreditRecord>>,
}

impl MemoryLedger {
    pub fn new(accounts: Arc<MemoryAccounts>) -> Self {
        Self {
            accounts,
            idempotency_keys: Mutex::new(HashSet::new()),
            credits: Mutex::new(Vec::new()),
        }
    }

    pub fn accounts(&self) -> &Arc<MemoryAccounts> {
        &self.accounts
    }

    pub fn credits(&self) -> Vec<CreditRecord> {
        self.credits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn cell(&self, user: UserId) -> BillingResult<Arc<AccountCell>> {
        self.accounts
            .cell(user)
            .ok_or(BillingError::AccountNotFound(user))
    }

    fn record_credit(&self, user_id: UserId, points: i64, reason: &str, balance_after: i64) {
        self.credits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(CreditRecord {
                user_id,
                points,
                reason: reason.to_string(),
                balance_after,
            });
    }
}

struct MemoryHold {
    cell: Arc<AccountCell>,
    _row_lock: OwnedMutexGuard<()>,
    user: UserId,
    balance_before: i64,
    price: i64,
}

#[async_trait]
impl BalanceHold for MemoryHold {
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
        let price = self.price;
        let balance = self.cell.update(|record| {
            record.balance -= price;
            record.balance
        });
        Ok(balance)
    }

    async fn release(self: Box<Self>) {}
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn balance(&self, user: UserId) -> BillingResult<i64> {
        Ok(self.cell(user)?.read().balance)
    }

    async fn hold(&self, user: UserId, price: i64) -> BillingResult<Box<dyn BalanceHold>> {
        let cell = self.cell(user)?;
        let row_lock = cell.lock_row().await;
        let balance = cell.read().balance;

        if balance < price {
            return Err(BillingError::InsufficientBalance { balance, price });
        }

        Ok(Box::new(MemoryHold {
            cell,
            _row_lock: row_lock,
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

        let cell = self.cell(user)?;
        let _row_lock = cell.lock_row().await;
        let new_balance = cell
            .read()
            .balance
            .checked_add(points)
            .ok_or_else(|| BillingError::InvalidAmount(format!("balance overflow adding {points}")))?;

        if let Some(key) = &entry.idempotency_key {
            let mut keys = self
                .idempotency_keys
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !keys.insert(key.clone()) {
                return Ok(CreditOutcome::Duplicate);
            }
        }

        cell.update(|record| record.balance = new_balance);
        self.record_credit(user, points, &entry.reason, new_balance);

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

        let cell = self.cell(user)?;
        let _row_lock = cell.lock_row().await;
        let new_balance = adjusted_balance(cell.read().balance, delta)?;

        cell.update(|record| record.balance = new_balance);
        self.record_credit(user, delta, reason, new_balance);
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

        let cell = self.cell(user)?;
        let _row_lock = cell.lock_row().await;
        let record = cell.read();
        check_cooldown(record.last_reward_claim, cooldown, now)?;

        let new_balance = record
            .balance
            .checked_add(points)
            .ok_or_else(|| BillingError::InvalidAmount(format!("balance overflow adding {points}")))?;

        cell.update(|record| {
            record.balance = new_balance;
            record.last_reward_claim = Some(now);
        });
        if points > 0 {
            self.record_credit(user, points, "daily_reward", new_balance);
        }

        Ok(RewardClaim {
            balance: new_balance,
            next_claim_at: now + cooldown,
        })
    }
}
