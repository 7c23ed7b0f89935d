//! Login and current-account routes
//!
//! Registration lives outside this service; accounts come from the bootstrap
//! administrator or are provisioned directly in the database.

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use pointgate_shared::{AccountSnapshot, AccountStatus};

use crate::{
    auth::{verify_password, AuthUser, AUTH_COOKIE},
    error::{ApiError, ApiResult},
    routes::json_body,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: AccountSnapshot,
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = json_body(payload)?;
    let login = request.login.trim();

    let credentials = state
        .accounts
        .find_credentials(login)
        .await?
        .filter(|c| verify_password(&request.password, &c.password_hash));

    let Some(credentials) = credentials else {
        tracing::info!(login = %login, "Login failed");
        return Err(ApiError::Unauthenticated);
    };
    let user = credentials.snapshot;

    if user.status == AccountStatus::Banned {
        tracing::info!(user_id = %user.user_id, "Login refused for banned account");
        return Err(ApiError::Forbidden("account is banned".to_string()));
    }

    let issued = state
        .jwt_manager
        .generate_access_token(user.user_id, user.privilege)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(user_id = %user.user_id, jti = %issued.jti, "Login succeeded");

    let cookie = format!(
        "{AUTH_COOKIE}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        issued.token,
        state.jwt_manager.access_token_expiry_seconds()
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            token: issued.token,
            expires_at: issued.expires_at,
            user,
        }),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<AccountSnapshot>> {
    let snapshot = state
        .accounts
        .find_snapshot(auth_user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("account {}", auth_user.user_id)))?;

    Ok(Json(snapshot))
}
