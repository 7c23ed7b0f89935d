// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![allow(clippy::result_large_err)] // BillingError carries timestamps and messages

//! Pointgate Billing Module
//!
//! Everything that prices, charges or credits points.
//!
//! ## Features
//!
//! - **Cost Resolution**: price a request from the live configuration document
//! - **Ledger**: lock-debit-run-commit around paid work, credits, adjustments
//! - **History**: one record per successful metered call
//! - **Checkout**: Stripe Checkout sessions for point packages
//! - **Webhooks**: signed, idempotent crediting of completed purchases
//! - **Rewards**: daily free points with a 24h cooldown

pub mod checkout;
pub mod client;
pub mod error;
pub mod history;
pub mod ledger;
pub mod memory;
pub mod pricing;
pub mod rewards;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// History
pub use history::{GenerationRecord, HistorySink, MemoryHistory, PgHistory};

// Ledger
pub use ledger::{
    charge_and_run, BalanceHold, ChargeError, Charged, CreditEntry, CreditOutcome, Ledger,
    PgLedger, RewardClaim,
};
pub use memory::{CreditRecord, MemoryLedger};

// Pricing
pub use pricing::{OperationKind, OperationRequest, Quote, SPEECH_BLOCK_CHARS};

// Rewards
pub use rewards::{RewardService, REWARD_COOLDOWN};

// Webhooks
pub use webhooks::{WebhookEvent, WebhookHandler, WebhookOutcome};

use std::sync::Arc;

/// Payment-processor side of billing, present only when billing is enabled
pub struct BillingService {
    pub checkout: CheckoutService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(ledger: Arc<dyn Ledger>) -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?, ledger))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, ledger: Arc<dyn Ledger>) -> Self {
        let webhook_secret = config.webhook_secret.clone();
        let stripe = StripeClient::new(config);

        Self {
            checkout: CheckoutService::new(stripe),
            webhooks: WebhookHandler::new(ledger, webhook_secret),
        }
    }
}
