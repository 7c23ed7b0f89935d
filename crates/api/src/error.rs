//! API error type and failure envelope
//!
//! Every failure leaves the server as
//! `{"errorKind": ..., "message": ..., "balance"?: ...}` with the status code
//! fixed by its kind. Some kinds add fields (`nextClaimAt`, maintenance
//! `notice` and `theme`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pointgate_billing::BillingError;
use pointgate_shared::StoreError;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use time::OffsetDateTime;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidOperation,
    Validation,
    Unauthenticated,
    InsufficientBalance,
    Forbidden,
    NotFound,
    ContentBlocked,
    RewardOnCooldown,
    Internal,
    NoOutputProduced,
    ProviderUnavailable,
    ConfigurationUnavailable,
    ServiceUnderMaintenance,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidOperation | ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ContentBlocked => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::RewardOnCooldown => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NoOutputProduced | ErrorKind::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::ConfigurationUnavailable | ErrorKind::ServiceUnderMaintenance => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient balance: have {balance}, need {price}")]
    InsufficientBalance { balance: i64, price: i64 },

    #[error("Content blocked by provider: {reason}")]
    ContentBlocked { reason: String, balance: i64 },

    #[error("Provider returned no output")]
    NoOutputProduced { balance: i64 },

    #[error("Provider unavailable: {message}")]
    ProviderUnavailable {
        message: String,
        balance: Option<i64>,
    },

    #[error("Configuration unavailable: {0}")]
    ConfigurationUnavailable(String),

    #[error("Service under maintenance")]
    ServiceUnderMaintenance {
        notice: BTreeMap<String, String>,
        theme: Value,
    },

    #[error("Reward already claimed, next claim at {next_claim_at}")]
    RewardOnCooldown { next_claim_at: OffsetDateTime },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::Unauthenticated => ErrorKind::Unauthenticated,
            ApiError::Forbidden(_) => ErrorKind::Forbidden,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            ApiError::ContentBlocked { .. } => ErrorKind::ContentBlocked,
            ApiError::NoOutputProduced { .. } => ErrorKind::NoOutputProduced,
            ApiError::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            ApiError::ConfigurationUnavailable(_) => ErrorKind::ConfigurationUnavailable,
            ApiError::ServiceUnderMaintenance { .. } => ErrorKind::ServiceUnderMaintenance,
            ApiError::RewardOnCooldown { .. } => ErrorKind::RewardOnCooldown,
            ApiError::Database(_) | ApiError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Balance to report alongside the failure, if the failure concerns one
    pub fn balance(&self) -> Option<i64> {
        match self {
            ApiError::InsufficientBalance { balance, .. }
            | ApiError::ContentBlocked { balance, .. }
            | ApiError::NoOutputProduced { balance } => Some(*balance),
            ApiError::ProviderUnavailable { balance, .. } => *balance,
            _ => None,
        }
    }

    /// Client-facing message; internal details stay in the logs
    fn public_message(&self) -> String {
        match self {
            ApiError::InsufficientBalance { balance, price } => format!(
                "This operation costs {price} points but your balance is {balance}."
            ),
            ApiError::ContentBlocked { .. } => "The request was blocked by the provider's safety \
                 filters. Rephrase the prompt without violent, sexual or identifying content and \
                 try again."
                .to_string(),
            ApiError::NoOutputProduced { .. } => {
                "The provider returned no result. You have not been charged.".to_string()
            }
            ApiError::ProviderUnavailable { .. } => {
                "The generation provider is unavailable. You have not been charged.".to_string()
            }
            ApiError::ConfigurationUnavailable(_) => {
                "Configuration is temporarily unavailable.".to_string()
            }
            ApiError::ServiceUnderMaintenance { notice, .. } => notice
                .get("en")
                .or_else(|| notice.values().next())
                .cloned()
                .unwrap_or_else(|| "Service under maintenance.".to_string()),
            ApiError::Database(_) | ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self {
            ApiError::InsufficientBalance { balance, price } => {
                tracing::info!(balance, price, error_kind = "InsufficientBalance", "Request rejected");
            }
            ApiError::NoOutputProduced { .. } => {
                tracing::warn!(error_kind = "NoOutputProduced", "Provider returned no output");
            }
            ApiError::ProviderUnavailable { message, .. } => {
                tracing::error!(error_kind = "ProviderUnavailable", error = %message, "Provider call failed");
            }
            ApiError::ConfigurationUnavailable(message) => {
                tracing::error!(error_kind = "ConfigurationUnavailable", error = %message, "Configuration unavailable");
            }
            ApiError::Database(e) => {
                tracing::error!(error = ?e, "Database error");
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal error");
            }
            other => {
                tracing::debug!(error_kind = ?other.kind(), error = %other, "Request failed");
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let kind = self.kind();
        let mut body = Map::new();
        body.insert("errorKind".to_string(), json!(kind));
        body.insert("message".to_string(), json!(self.public_message()));
        if let Some(balance) = self.balance() {
            body.insert("balance".to_string(), json!(balance));
        }

        match &self {
            ApiError::RewardOnCooldown { next_claim_at } => {
                if let Ok(formatted) =
                    next_claim_at.format(&time::format_description::well_known::Rfc3339)
                {
                    body.insert("nextClaimAt".to_string(), json!(formatted));
                }
            }
            ApiError::ServiceUnderMaintenance { notice, theme } => {
                body.insert("notice".to_string(), json!(notice));
                body.insert("theme".to_string(), theme.clone());
            }
            _ => {}
        }

        (kind.status(), Json(Value::Object(body))).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::InvalidOperation(msg) => ApiError::InvalidOperation(msg),
            BillingError::PriceMisconfigured(msg) => ApiError::ConfigurationUnavailable(msg),
            BillingError::InsufficientBalance { balance, price } => {
                ApiError::InsufficientBalance { balance, price }
            }
            BillingError::AccountNotFound(user) => {
                ApiError::NotFound(format!("account {user} not found"))
            }
            BillingError::RewardOnCooldown { next_claim_at } => {
                ApiError::RewardOnCooldown { next_claim_at }
            }
            BillingError::InvalidAmount(msg) => ApiError::Validation(msg),
            BillingError::PackageNotFound(id) => ApiError::NotFound(format!("package '{id}'")),
            BillingError::WebhookSignatureInvalid => {
                ApiError::Validation("invalid webhook signature".to_string())
            }
            BillingError::WebhookPayload(msg) => ApiError::Validation(msg),
            BillingError::Stripe(message) => ApiError::ProviderUnavailable {
                message,
                balance: None,
            },
            BillingError::Config(msg) => ApiError::ConfigurationUnavailable(msg),
            BillingError::Database(msg) => ApiError::Internal(msg),
            BillingError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(e) => ApiError::Database(e),
            StoreError::Conflict(what) => ApiError::Validation(format!("{what} already exists")),
            StoreError::Corrupt(msg) => ApiError::Internal(msg),
            StoreError::Unavailable(msg) => ApiError::ConfigurationUnavailable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(error: ApiError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn insufficient_balance_envelope_carries_balance() {
        let (status, body) = body_of(ApiError::InsufficientBalance {
            balance: 3,
            price: 5,
        })
        .await;

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["errorKind"], "InsufficientBalance");
        assert_eq!(body["balance"], 3);
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let (status, body) = body_of(ApiError::Internal("pool exhausted at 10.0.0.3".into())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("balance").is_none());
    }

    #[tokio::test]
    async fn maintenance_envelope_includes_notice_and_theme() {
        let notice = BTreeMap::from([
            ("en".to_string(), "Back soon".to_string()),
            ("ru".to_string(), "Скоро вернёмся".to_string()),
        ]);
        let (status, body) = body_of(ApiError::ServiceUnderMaintenance {
            notice,
            theme: json!({ "primaryColor": "#000" }),
        })
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "Back soon");
        assert_eq!(body["notice"]["ru"], "Скоро вернёмся");
        assert_eq!(body["theme"]["primaryColor"], "#000");
    }

    #[test]
    fn every_kind_has_the_documented_status() {
        let expected = [
            (ErrorKind::InvalidOperation, 400),
            (ErrorKind::Validation, 400),
            (ErrorKind::Unauthenticated, 401),
            (ErrorKind::InsufficientBalance, 402),
            (ErrorKind::Forbidden, 403),
            (ErrorKind::NotFound, 404),
            (ErrorKind::ContentBlocked, 422),
            (ErrorKind::RewardOnCooldown, 429),
            (ErrorKind::Internal, 500),
            (ErrorKind::NoOutputProduced, 502),
            (ErrorKind::ProviderUnavailable, 502),
            (ErrorKind::ConfigurationUnavailable, 503),
            (ErrorKind::ServiceUnderMaintenance, 503),
        ];

        for (kind, status) in expected {
            assert_eq!(kind.status().as_u16(), status, "{kind:?}");
        }
    }

    #[test]
    fn billing_errors_map_to_api_kinds() {
        let cases = [
            (
                ApiError::from(BillingError::InvalidOperation("x".into())),
                ErrorKind::InvalidOperation,
            ),
            (
                ApiError::from(BillingError::PriceMisconfigured("x".into())),
                ErrorKind::ConfigurationUnavailable,
            ),
            (
                ApiError::from(BillingError::InvalidAmount("x".into())),
                ErrorKind::Validation,
            ),
            (
                ApiError::from(BillingError::WebhookSignatureInvalid),
                ErrorKind::Validation,
            ),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind);
        }
    }
}
