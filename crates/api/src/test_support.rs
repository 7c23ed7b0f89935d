//! In-memory application fixture shared by router tests

use axum::Router;
use std::sync::Arc;

use pointgate_billing::{BillingService, MemoryHistory, MemoryLedger, StripeConfig};
use pointgate_shared::{
    MemoryAccounts, MemorySettingsRepository, Privilege, SettingsStore, UserId,
};

use crate::config::Config;
use crate::provider::scripted::ScriptedProvider;
use crate::routes::create_router;
use crate::state::{AppState, Backends};

pub const TEST_JWT_SECRET: &str = "router-test-secret-at-least-32-characters";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_router_test";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/pointgate_test".to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        jwt_expiry_hours: 24,
        gemini_api_key: "test-key".to_string(),
        gemini_base_url: "http://127.0.0.1:9".to_string(),
        provider_timeout_secs: 5,
        enable_billing: false,
        allowed_origins: vec!["http://localhost:3000".to_string()],
        run_migrations: false,
        bootstrap_admin: None,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub accounts: Arc<MemoryAccounts>,
    pub settings_repo: Arc<MemorySettingsRepository>,
    pub ledger: Arc<MemoryLedger>,
    pub history: Arc<MemoryHistory>,
    pub provider: Arc<ScriptedProvider>,
}

impl TestApp {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::build(provider, false)
    }

    /// Billing enabled with a fake Stripe key; only webhook paths are usable offline
    pub fn with_billing(provider: ScriptedProvider) -> Self {
        Self::build(provider, true)
    }

    fn build(provider: ScriptedProvider, billing: bool) -> Self {
        let accounts = Arc::new(MemoryAccounts::new());
        let settings_repo = Arc::new(MemorySettingsRepository::new());
        let ledger = Arc::new(MemoryLedger::new(accounts.clone()));
        let history = Arc::new(MemoryHistory::new());
        let provider = Arc::new(provider);

        let billing = billing.then(|| {
            Arc::new(BillingService::new(
                StripeConfig {
                    secret_key: "sk_test_offline".to_string(),
                    webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
                    success_url: "http://localhost:3000/ok".to_string(),
                    cancel_url: "http://localhost:3000/cancel".to_string(),
                },
                ledger.clone(),
            ))
        });

        let backends = Backends {
            settings: Arc::new(SettingsStore::new(settings_repo.clone())),
            accounts: accounts.clone(),
            ledger: ledger.clone(),
            history: history.clone(),
            provider: provider.clone(),
        };

        Self {
            state: AppState::with_backends(test_config(), backends, billing),
            accounts,
            settings_repo,
            ledger,
            history,
            provider,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn seed(&self, username: &str, balance: i64, privilege: Privilege) -> (UserId, String) {
        let user = self.accounts.seed(username, balance, privilege).unwrap();
        let token = self
            .state
            .jwt_manager
            .generate_access_token(user, privilege)
            .map(|issued| issued.token)
            .unwrap_or_default();
        (user, token)
    }
}
