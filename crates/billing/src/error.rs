//! Billing error types

use pointgate_shared::{StoreError, UserId};
use thiserror::Error;
use time::OffsetDateTime;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Price misconfigured: {0}")]
    PriceMisconfigured(String),

    #[error("Insufficient balance: have {balance}, need {price}")]
    InsufficientBalance { balance: i64, price: i64 },

    #[error("Account not found: {0}")]
    AccountNotFound(UserId),

    #[error("Reward already claimed, next claim at {next_claim_at}")]
    RewardOnCooldown { next_claim_at: OffsetDateTime },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    WebhookPayload(String),

    #[error("Stripe error: {0}")]
    Stripe(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::Stripe(e.to_string())
    }
}
