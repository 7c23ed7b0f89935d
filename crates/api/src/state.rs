//! Application state

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use pointgate_billing::{BillingService, HistorySink, Ledger, PgHistory, PgLedger, RewardService};
use pointgate_shared::{
    AccountRepository, PgAccountRepository, PgSettingsRepository, SettingsStore,
};

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
    gateway::GenerationGateway,
    provider::{GeminiProvider, GenerationProvider},
};

/// Storage and provider backends the state is assembled from
pub struct Backends {
    pub settings: Arc<SettingsStore>,
    pub accounts: Arc<dyn AccountRepository>,
    pub ledger: Arc<dyn Ledger>,
    pub history: Arc<dyn HistorySink>,
    pub provider: Arc<dyn GenerationProvider>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt_manager: JwtManager,
    pub settings: Arc<SettingsStore>,
    pub accounts: Arc<dyn AccountRepository>,
    pub ledger: Arc<dyn Ledger>,
    pub gateway: Arc<GenerationGateway>,
    pub rewards: Arc<RewardService>,
    /// Stripe checkout and webhooks, `None` unless billing is enabled and configured
    pub billing: Option<Arc<BillingService>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let provider = GeminiProvider::new(&config.gemini_api_key, &config.gemini_base_url)?;
        tracing::info!(base_url = %config.gemini_base_url, "Gemini provider initialized");

        let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(pool.clone()));

        let billing = if config.enable_billing {
            match BillingService::from_env(ledger.clone()) {
                Ok(svc) => {
                    tracing::info!("Stripe billing service initialized");
                    Some(Arc::new(svc))
                }
                Err(e) => {
                    tracing::warn!("Stripe billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        let backends = Backends {
            settings: Arc::new(SettingsStore::new(Arc::new(PgSettingsRepository::new(
                pool.clone(),
            )))),
            accounts: Arc::new(PgAccountRepository::new(pool.clone())),
            ledger,
            history: Arc::new(PgHistory::new(pool)),
            provider: Arc::new(provider),
        };

        Ok(Self::with_backends(config, backends, billing))
    }

    pub fn with_backends(
        config: Config,
        backends: Backends,
        billing: Option<Arc<BillingService>>,
    ) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let gateway = GenerationGateway::new(
            backends.settings.clone(),
            backends.ledger.clone(),
            backends.provider,
            backends.history,
            Duration::from_secs(config.provider_timeout_secs),
        );
        let rewards = RewardService::new(backends.ledger.clone(), backends.settings.clone());

        Self {
            config: Arc::new(config),
            jwt_manager,
            settings: backends.settings,
            accounts: backends.accounts,
            ledger: backends.ledger,
            gateway: Arc::new(gateway),
            rewards: Arc::new(rewards),
            billing,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            accounts: self.accounts.clone(),
        }
    }

    pub fn billing_service(&self) -> Option<&Arc<BillingService>> {
        self.billing.as_ref()
    }
}
