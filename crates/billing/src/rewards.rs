//! Daily free points

use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use pointgate_shared::{SettingsStore, UserId};

use crate::error::{BillingError, BillingResult};
use crate::ledger::{Ledger, RewardClaim};

pub const REWARD_COOLDOWN: Duration = Duration::hours(24);

pub struct RewardService {
    ledger: Arc<dyn Ledger>,
    settings: Arc<SettingsStore>,
}

impl RewardService {
    pub fn new(ledger: Arc<dyn Ledger>, settings: Arc<SettingsStore>) -> Self {
        Self { ledger, settings }
    }

    /// Credit `rewards.dailyPoints` if the last claim is at least 24h old
    pub async fn claim_daily(&self, user: UserId, now: OffsetDateTime) -> BillingResult<RewardClaim> {
        let document = self.settings.get().await;
        let points = document
            .rewards()
            .map_err(|e| BillingError::Config(e.to_string()))?
            .daily_points;

        let claim = self
            .ledger
            .claim_reward(user, points, REWARD_COOLDOWN, now)
            .await?;

        tracing::info!(user_id = %user, points, balance = claim.balance, "Daily reward claimed");
        Ok(claim)
    }
}
