//! Point purchases through Stripe Checkout

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use pointgate_billing::{BillingService, CheckoutResponse, WebhookOutcome};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::json_body,
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub package_id: String,
}

fn billing_service(state: &AppState) -> ApiResult<&Arc<BillingService>> {
    state
        .billing_service()
        .ok_or_else(|| ApiError::NotFound("billing is not enabled".to_string()))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutResponse>> {
    let billing = billing_service(&state)?;
    let request = json_body(payload)?;
    let catalog = state.settings.get().await.store_catalog()?;

    let response = billing
        .checkout
        .create_session(auth_user.user_id, &request.package_id, &catalog)
        .await?;

    Ok(Json(response))
}

/// Stripe webhook; the body must stay raw for signature verification
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let billing = billing_service(&state)?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing Stripe-Signature header".to_string()))?;

    let event = billing.webhooks.verify_event(&body, signature)?;
    let outcome = billing.webhooks.handle_event(event).await?;

    let label = match outcome {
        WebhookOutcome::Credited { .. } => "credited",
        WebhookOutcome::Duplicate => "duplicate",
        WebhookOutcome::AwaitingPayment => "awaiting_payment",
        WebhookOutcome::Ignored => "ignored",
    };

    Ok(Json(json!({ "received": true, "outcome": label })))
}
