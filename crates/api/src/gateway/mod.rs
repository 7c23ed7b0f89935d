//! Metered generation gateway
//!
//! `execute` reads the effective settings, prices the request, validates
//! the provider input and then runs the provider call inside
//! [`charge_and_run`]. Anything other than a usable artifact or text takes
//! the ledger's failure path, so the caller's balance is either
//! `before - price` or `before`, nothing else.


use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use pointgate_billing::{
    charge_and_run, pricing, ChargeError, Charged, GenerationRecord, HistorySink, Ledger,
    OperationRequest, Quote,
};
use pointgate_shared::{SettingsStore, UserId};

use crate::error::{ApiError, ApiResult};
use crate::provider::{GenerationProvider, ProviderCall, ProviderError, ProviderOutput};

/// Binary provider output, base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub mime_type: String,
    pub data: String,
}

/// Serializes as `{"artifact": {...}}` or `{"text": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationResult {
    Artifact(Artifact),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub result: GenerationResult,
    pub balance: i64,
    pub price: i64,
}

/// Why a charged provider call is treated as failed
#[derive(Debug)]
enum CallFailure {
    Blocked(String),
    Empty,
    Provider(ProviderError),
    TimedOut(Duration),
}

pub struct GenerationGateway {
    settings: Arc<SettingsStore>,
    ledger: Arc<dyn Ledger>,
    provider: Arc<dyn GenerationProvider>,
    history: Arc<dyn HistorySink>,
    timeout: Duration,
}

impl GenerationGateway {
    pub fn new(
        settings: Arc<SettingsStore>,
        ledger: Arc<dyn Ledger>,
        provider: Arc<dyn GenerationProvider>,
        history: Arc<dyn HistorySink>,
        timeout: Duration,
    ) -> Self {
        Self {
            settings,
            ledger,
            provider,
            history,
            timeout,
        }
    }

    pub async fn execute(
        &self,
        user_id: UserId,
        request: OperationRequest,
    ) -> ApiResult<GenerationResponse> {
        let document = self.settings.get().await;
        let quote = pricing::quote(&request, &document)?;
        let call = ProviderCall::from_request(&request, &quote)?;

        tracing::debug!(
            user_id = %user_id,
            kind = %quote.kind,
            model = %quote.model,
            price = quote.price,
            "Executing metered call"
        );

        let charged = charge_and_run(self.ledger.as_ref(), user_id, quote.price, || {
            self.invoke(&call)
        })
        .await;

        match charged {
            Ok(Charged { outcome, balance }) => {
                self.record_history(user_id, &quote, balance).await;
                tracing::info!(
                    user_id = %user_id,
                    kind = %quote.kind,
                    price = quote.price,
                    balance,
                    "Metered call succeeded"
                );
                Ok(GenerationResponse {
                    result: outcome,
                    balance,
                    price: quote.price,
                })
            }
            Err(ChargeError::Ledger(e)) => Err(e.into()),
            Err(ChargeError::Work { error, balance }) => {
                Err(failure_to_error(error, balance, &quote))
            }
        }
    }

    async fn invoke(&self, call: &ProviderCall) -> Result<GenerationResult, CallFailure> {
        let output = tokio::time::timeout(self.timeout, self.provider.generate(call))
            .await
            .map_err(|_| CallFailure::TimedOut(self.timeout))?
            .map_err(CallFailure::Provider)?;

        match output {
            ProviderOutput::Binary { mime_type, data } => {
                Ok(GenerationResult::Artifact(Artifact {
                    mime_type,
                    data: STANDARD.encode(data),
                }))
            }
            ProviderOutput::Text(text) => Ok(GenerationResult::Text(text)),
            ProviderOutput::Blocked { reason } => Err(CallFailure::Blocked(reason)),
            ProviderOutput::Empty => Err(CallFailure::Empty),
        }
    }

    async fn record_history(&self, user_id: UserId, quote: &Quote, balance: i64) {
        let entry = GenerationRecord::new(user_id, quote.kind, &quote.model, quote.price, balance);
        if let Err(e) = self.history.record(entry).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to record generation history");
        }
    }
}

fn failure_to_error(failure: CallFailure, balance: i64, quote: &Quote) -> ApiError {
    match failure {
        CallFailure::Blocked(reason) => {
            tracing::info!(kind = %quote.kind, reason = %reason, "Provider blocked content");
            ApiError::ContentBlocked { reason, balance }
        }
        CallFailure::Empty => ApiError::NoOutputProduced { balance },
        CallFailure::Provider(e) => ApiError::ProviderUnavailable {
            message: e.to_string(),
            balance: Some(balance),
        },
        CallFailure::TimedOut(after) => ApiError::ProviderUnavailable {
            message: format!("provider call timed out after {}s", after.as_secs_f32()),
            balance: Some(balance),
        },
    }
}
