//! Maintenance gate
//!
//! Reads `maintenance` from the effective settings on every request. While
//! it is enabled, only administrators and the paths in
//! `maintenance.allowedPaths` get through; everyone else receives a 503
//! carrying the notice and the `theme` section so a client can still render
//! a maintenance page.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use pointgate_shared::MaintenanceSettings;

use crate::auth::middleware::{authenticate, extract_bearer_token};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Maintenance,
}

impl GateState {
    pub fn of(settings: &MaintenanceSettings) -> Self {
        if settings.enabled {
            GateState::Maintenance
        } else {
            GateState::Open
        }
    }
}

/// Whether a request may pass without knowing who is calling
pub fn admits_anonymous(settings: &MaintenanceSettings, path: &str) -> bool {
    match GateState::of(settings) {
        GateState::Open => true,
        GateState::Maintenance => settings.allows_path(path),
    }
}

pub async fn maintenance_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let document = state.settings.get().await;
    let maintenance = document.maintenance();
    let path = request.uri().path().to_string();

    if admits_anonymous(&maintenance, &path) {
        return next.run(request).await;
    }

    // Administrators pass; a bad or missing token is simply not an admin here
    let is_admin = match extract_bearer_token(&request) {
        Some(token) => authenticate(&state.auth_state(), &token)
            .await
            .map(|user| user.is_admin())
            .unwrap_or(false),
        None => false,
    };

    if is_admin {
        tracing::debug!(path = %path, "Maintenance gate: administrator passed");
        return next.run(request).await;
    }

    tracing::debug!(path = %path, "Maintenance gate: request rejected");
    ApiError::ServiceUnderMaintenance {
        notice: maintenance.message,
        theme: document.section("theme").cloned().unwrap_or(Value::Null),
    }
    .into_response()
}
