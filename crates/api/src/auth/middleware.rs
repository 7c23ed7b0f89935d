//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::header::{AUTHORIZATION, COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use pointgate_shared::{AccountRepository, AccountSnapshot, AccountStatus, Privilege, UserId};

use super::jwt::{JwtError, JwtManager};
use crate::error::ApiError;

/// Cookie set by the web client after login
pub const AUTH_COOKIE: &str = "pointgate_auth_token";

/// Authenticated caller, re-read from the account store on every request.
///
/// `balance` is a snapshot for display; charging re-reads it under the
/// ledger's row lock.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub username: String,
    pub privilege: Privilege,
    pub status: AccountStatus,
    pub balance: i64,
    pub token_id: String,
}

impl AuthUser {
    fn from_snapshot(snapshot: AccountSnapshot, token_id: String) -> Self {
        Self {
            user_id: snapshot.user_id,
            username: snapshot.username,
            privilege: snapshot.privilege,
            status: snapshot.status,
            balance: snapshot.balance,
            token_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.privilege.is_admin()
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions)
        }
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub accounts: Arc<dyn AccountRepository>,
}

fn extract_token_from_cookie(request: &Request) -> Option<String> {
    let cookies = request.headers().get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|cookie| {
        cookie
            .trim()
            .strip_prefix(AUTH_COOKIE)
            .and_then(|rest| rest.strip_prefix('='))
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    })
}

/// Bearer token from the Authorization header, falling back to the auth cookie
pub(crate) fn extract_bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    extract_token_from_cookie(request)
}

/// Validate the token and load the account it names
pub(crate) async fn authenticate(
    auth_state: &AuthState,
    token: &str,
) -> Result<AuthUser, AuthError> {
    let claims = auth_state
        .jwt_manager
        .validate_token(token)
        .map_err(|e| match e {
            JwtError::Expired => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        })?;

    let user_id = claims.user_id().map_err(|_| AuthError::InvalidToken)?;

    let snapshot = auth_state
        .accounts
        .find_snapshot(user_id)
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .ok_or(AuthError::InvalidToken)?;

    if snapshot.status == AccountStatus::Banned {
        return Err(AuthError::AccountBanned);
    }

    Ok(AuthUser::from_snapshot(snapshot, claims.jti))
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_bearer_token(&request) {
        Some(token) => authenticate(&auth_state, &token).await,
        None => Err(AuthError::MissingAuth),
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id,
                privilege = %auth_user.privilege,
                "require_auth: authenticated"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

/// Middleware that requires an administrator
pub async fn require_admin(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_result = match extract_bearer_token(&request) {
        Some(token) => authenticate(&auth_state, &token).await,
        None => Err(AuthError::MissingAuth),
    };

    match auth_result.and_then(|user| user.require_admin().map(|()| user)) {
        Ok(auth_user) => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %request.uri().path(), error = %err, "require_admin: rejected");
            err.into_response()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Account is banned")]
    AccountBanned,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth | AuthError::InvalidToken | AuthError::ExpiredToken => {
                ApiError::Unauthenticated
            }
            AuthError::AccountBanned => ApiError::Forbidden("account is banned".to_string()),
            AuthError::InsufficientPermissions => {
                ApiError::Forbidden("administrator privilege required".to_string())
            }
            AuthError::Internal(message) => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
