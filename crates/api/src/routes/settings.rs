//! Configuration document routes

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    Json,
};
use serde_json::Value;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::json_body,
    state::AppState,
};

/// Effective document: persisted overrides merged over the defaults
pub async fn get_settings(State(state): State<AppState>) -> Json<Value> {
    Json(state.settings.get().await.as_value().clone())
}

/// Persist a new document verbatim and return the effective result
pub async fn put_settings(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let document = json_body(payload)?;
    if !document.is_object() {
        return Err(ApiError::Validation(
            "configuration document must be a JSON object".to_string(),
        ));
    }

    state.settings.put(document).await?;
    tracing::info!(
        admin_id = %auth_user.user_id,
        admin = %auth_user.username,
        "Configuration document replaced"
    );

    Ok(Json(state.settings.get().await.as_value().clone()))
}
