//! Administrator account routes

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use pointgate_shared::UserId;

use crate::{
    auth::AuthUser,
    error::ApiResult,
    routes::json_body,
    state::AppState,
};

const DEFAULT_ADJUST_REASON: &str = "admin adjustment";

#[derive(Debug, Deserialize)]
pub struct AdjustBalanceRequest {
    pub delta: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustBalanceResponse {
    pub user_id: UserId,
    pub balance: i64,
}

/// Add or remove points; the balance never goes below zero
pub async fn adjust_balance(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<i64>,
    payload: Result<Json<AdjustBalanceRequest>, JsonRejection>,
) -> ApiResult<Json<AdjustBalanceResponse>> {
    let request = json_body(payload)?;
    let user_id = UserId(user_id);
    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_ADJUST_REASON);

    let balance = state.ledger.adjust(user_id, request.delta, reason).await?;

    tracing::info!(
        admin_id = %auth_user.user_id,
        user_id = %user_id,
        delta = request.delta,
        balance,
        reason = %reason,
        "Balance adjusted by administrator"
    );

    Ok(Json(AdjustBalanceResponse { user_id, balance }))
}
