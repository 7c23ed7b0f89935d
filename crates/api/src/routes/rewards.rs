use axum::{
    extract::{Extension, State},
    Json,
};
use time::OffsetDateTime;

use pointgate_billing::RewardClaim;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// Daily free points, once per 24 hours
pub async fn claim_daily(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<RewardClaim>> {
    let claim = state
        .rewards
        .claim_daily(auth_user.user_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(claim))
}
