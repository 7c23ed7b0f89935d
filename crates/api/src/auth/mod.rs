//! Authentication module for Pointgate

#[cfg(test)]
mod edge_case_tests;
pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, IssuedToken, JwtError, JwtManager};
pub use middleware::{require_admin, require_auth, AuthError, AuthState, AuthUser, AUTH_COOKIE};
pub use password::{hash_password, validate_password_strength, verify_password, PasswordError};
