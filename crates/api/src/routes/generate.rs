use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    Json,
};

use pointgate_billing::OperationRequest;

use crate::{
    auth::AuthUser, error::ApiResult, gateway::GenerationResponse, routes::json_body,
    state::AppState,
};

/// Metered generation call
pub async fn generate(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<OperationRequest>, JsonRejection>,
) -> ApiResult<Json<GenerationResponse>> {
    let request = json_body(payload)?;
    let response = state.gateway.execute(auth_user.user_id, request).await?;
    Ok(Json(response))
}
