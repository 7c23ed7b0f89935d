//! Account lookup for authentication
//!
//! The account repository only reads identities and creates the bootstrap
//! administrator. Balance mutations belong to the billing ledger.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::types::{AccountSnapshot, AccountStatus, Privilege, UserId};

/// Snapshot plus the stored password hash, returned only to the login flow
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub snapshot: AccountSnapshot,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub balance: i64,
    pub privilege: Privilege,
    pub status: AccountStatus,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_snapshot(&self, user_id: UserId) -> StoreResult<Option<AccountSnapshot>>;

    /// Look an account up by username or (case-insensitive) email
    async fn find_credentials(&self, login: &str) -> StoreResult<Option<AccountCredentials>>;

    async fn create_account(&self, account: NewAccount) -> StoreResult<AccountSnapshot>;
}

// =============================================================================
// Postgres
// =============================================================================

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    balance: i64,
    privilege: String,
    status: String,
    last_reward_claim: Option<OffsetDateTime>,
}

impl AccountRow {
    fn into_credentials(self) -> StoreResult<AccountCredentials> {
        let privilege = self.privilege.parse::<Privilege>().map_err(StoreError::Corrupt)?;
        let status = self.status.parse::<AccountStatus>().map_err(StoreError::Corrupt)?;
        Ok(AccountCredentials {
            snapshot: AccountSnapshot {
                user_id: UserId(self.id),
                username: self.username,
                email: self.email,
                balance: self.balance,
                privilege,
                status,
                last_reward_claim: self.last_reward_claim,
            },
            password_hash: self.password_hash,
        })
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, username, email, password_hash, balance, privilege, status, last_reward_claim";

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn find_snapshot(&self, user_id: UserId) -> StoreResult<Option<AccountSnapshot>> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id.get())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_credentials().map(|c| c.snapshot))
            .transpose()
    }

    async fn find_credentials(&self, login: &str) -> StoreResult<Option<AccountCredentials>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE username = $1 OR LOWER(email) = LOWER($1)"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountRow::into_credentials).transpose()
    }

    async fn create_account(&self, account: NewAccount) -> StoreResult<AccountSnapshot> {
        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, balance, privilege, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.balance)
        .bind(account.privilege.as_str())
        .bind(account.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, &account.username))?;

        tracing::info!(
            user_id = row.id,
            username = %row.username,
            privilege = %row.privilege,
            "Account created"
        );

        Ok(row.into_credentials()?.snapshot)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Mutable account state held by [`MemoryAccounts`]
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub balance: i64,
    pub privilege: Privilege,
    pub status: AccountStatus,
    pub last_reward_claim: Option<OffsetDateTime>,
}

impl AccountRecord {
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            user_id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            balance: self.balance,
            privilege: self.privilege,
            status: self.status,
            last_reward_claim: self.last_reward_claim,
        }
    }
}

/// One in-memory account row.
///
/// `row_lock` plays the part of `SELECT ... FOR UPDATE`: writers serialize on
/// it, while plain reads of the committed record never wait for it.
#[derive(Debug)]
pub struct AccountCell {
    row_lock: Arc<Mutex<()>>,
    record: RwLock<AccountRecord>,
}

impl AccountCell {
    fn new(record: AccountRecord) -> Self {
        Self {
            row_lock: Arc::new(Mutex::new(())),
            record: RwLock::new(record),
        }
    }

    pub async fn lock_row(&self) -> OwnedMutexGuard<()> {
        self.row_lock.clone().lock_owned().await
    }

    pub fn read(&self) -> AccountRecord {
        self.record
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut AccountRecord) -> R) -> R {
        let mut record = self
            .record
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut record)
    }
}

/// Account table kept in process memory, for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryAccounts {
    cells: RwLock<HashMap<UserId, Arc<AccountCell>>>,
    next_id: AtomicI64,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn cell(&self, user_id: UserId) -> Option<Arc<AccountCell>> {
        self.cells
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&user_id)
            .cloned()
    }

    /// Insert an account, enforcing the same uniqueness rules as the users table
    pub fn insert(&self, account: NewAccount) -> StoreResult<AccountSnapshot> {
        let mut cells = self
            .cells
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let taken = cells.values().any(|cell| {
            let existing = cell.read();
            existing.username == account.username
                || existing.email.eq_ignore_ascii_case(&account.email)
        });
        if taken {
            return Err(StoreError::Conflict(account.username));
        }

        let id = UserId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = AccountRecord {
            id,
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            balance: account.balance,
            privilege: account.privilege,
            status: account.status,
            last_reward_claim: None,
        };
        let snapshot = record.snapshot();
        cells.insert(id, Arc::new(AccountCell::new(record)));
        Ok(snapshot)
    }

    /// Convenience for tests: an active account with an unusable password
    pub fn seed(
        &self,
        username: &str,
        balance: i64,
        privilege: Privilege,
    ) -> StoreResult<UserId> {
        self.insert(NewAccount {
            username: username.to_string(),
            email: format!("{username}@example.test"),
            password_hash: String::new(),
            balance,
            privilege,
            status: AccountStatus::Active,
        })
        .map(|snapshot| snapshot.user_id)
    }

    pub fn balance_of(&self, user_id: UserId) -> Option<i64> {
        self.cell(user_id).map(|cell| cell.read().balance)
    }
}

#[async_trait]
impl AccountRepository for MemoryAccounts {
    async fn find_snapshot(&self, user_id: UserId) -> StoreResult<Option<AccountSnapshot>> {
        Ok(self.cell(user_id).map(|cell| cell.read().snapshot()))
    }

    async fn find_credentials(&self, login: &str) -> StoreResult<Option<AccountCredentials>> {
        let cells = self
            .cells
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Ok(cells
            .values()
            .map(|cell| cell.read())
            .find(|r| r.username == login || r.email.eq_ignore_ascii_case(login))
            .map(|r| AccountCredentials {
                snapshot: r.snapshot(),
                password_hash: r.password_hash,
            }))
    }

    async fn create_account(&self, account: NewAccount) -> StoreResult<AccountSnapshot> {
        self.insert(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(username: &str, email: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            balance: 10,
            privilege: Privilege::Ordinary,
            status: AccountStatus::Active,
        }
    }

    #[tokio::test]
    async fn find_credentials_matches_username_or_email() {
        let accounts = MemoryAccounts::new();
        accounts.insert(new_account("ada", "Ada@Example.com")).unwrap();

        let by_name = accounts.find_credentials("ada").await.unwrap().unwrap();
        let by_email = accounts
            .find_credentials("ada@example.com")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(by_name.snapshot.user_id, by_email.snapshot.user_id);
        assert_eq!(by_name.password_hash, "hash");
        assert!(accounts.find_credentials("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_or_email_conflicts() {
        let accounts = MemoryAccounts::new();
        accounts.insert(new_account("ada", "ada@example.com")).unwrap();

        let dup_name = accounts.insert(new_account("ada", "other@example.com"));
        let dup_email = accounts.insert(new_account("other", "ADA@example.com"));

        assert!(matches!(dup_name, Err(StoreError::Conflict(_))));
        assert!(matches!(dup_email, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn seeding_a_taken_username_reports_conflict() {
        let accounts = MemoryAccounts::new();
        accounts.seed("ada", 10, Privilege::Ordinary).unwrap();

        let again = accounts.seed("ada", 0, Privilege::Administrator);

        assert!(matches!(again, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_row_lock() {
        let accounts = MemoryAccounts::new();
        let id = accounts.seed("ada", 10, Privilege::Ordinary).unwrap();
        let cell = accounts.cell(id).unwrap();

        let _guard = cell.lock_row().await;
        let snapshot = accounts.find_snapshot(id).await.unwrap().unwrap();

        assert_eq!(snapshot.balance, 10);
    }
}
