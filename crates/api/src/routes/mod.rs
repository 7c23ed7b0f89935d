//! HTTP routes
//!
//! Public routes, user routes behind `require_auth` and admin routes behind
//! `require_admin`, all wrapped by the maintenance gate.

pub mod admin;
pub mod auth;
pub mod billing;
pub mod generate;
pub mod health;
pub mod rewards;
pub mod settings;


use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit},
    middleware,
    routing::{get, post, put},
    Json, Router,
};

use crate::{
    auth::{require_admin, require_auth},
    error::{ApiError, ApiResult},
    maintenance::maintenance_gate,
    state::AppState,
};

/// Inline images arrive base64 encoded in the JSON body
const GENERATE_BODY_LIMIT: usize = 20 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/api/settings", get(settings::get_settings))
        .route("/api/auth/login", post(auth::login))
        .route("/api/billing/webhook", post(billing::stripe_webhook));

    let user = Router::new()
        .route("/api/me", get(auth::me))
        .route(
            "/api/generate",
            post(generate::generate).layer(DefaultBodyLimit::max(GENERATE_BODY_LIMIT)),
        )
        .route("/api/rewards/daily", post(rewards::claim_daily))
        .route("/api/billing/checkout", post(billing::create_checkout))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ));

    let admin = Router::new()
        .route("/api/admin/settings", put(settings::put_settings))
        .route(
            "/api/admin/users/{id}/balance",
            post(admin::adjust_balance),
        )
        .layer(middleware::from_fn_with_state(auth_state, require_admin));

    Router::new()
        .merge(public)
        .merge(user)
        .merge(admin)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            maintenance_gate,
        ))
        .with_state(state)
}

/// Unwrap a JSON body, reporting malformed input in the error envelope
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}
