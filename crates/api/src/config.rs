//! Server configuration loaded from the environment

use std::str::FromStr;
use thiserror::Error;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("JWT_SECRET must be at least 32 characters")]
    WeakJwtSecret,
}

/// Credentials for the administrator created at startup when no account
/// with that username exists yet
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub provider_timeout_secs: u64,
    /// Stripe checkout and webhooks; Stripe keys are read by the billing crate
    pub enable_billing: bool,
    pub allowed_origins: Vec<String>,
    pub run_migrations: bool,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakJwtSecret);
        }

        let gemini_api_key = optional("GEMINI_API_KEY").unwrap_or_default();
        if gemini_api_key.is_empty() {
            tracing::warn!("GEMINI_API_KEY not set - generation requests will fail upstream");
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_address: optional("BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            jwt_secret,
            jwt_expiry_hours: positive("JWT_EXPIRY_HOURS", 24)?,
            gemini_api_key,
            gemini_base_url: optional("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            provider_timeout_secs: positive("PROVIDER_TIMEOUT_SECS", 120)?,
            enable_billing: flag("ENABLE_BILLING", false)?,
            allowed_origins: optional("ALLOWED_ORIGINS")
                .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            run_migrations: flag("RUN_MIGRATIONS", true)?,
            bootstrap_admin: bootstrap_admin(),
        })
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Like `parsed`, but zero and negative values are invalid
fn positive<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + ToString,
{
    let value = parsed(name, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(value) => Err(ConfigError::Invalid { name, value }),
    }
}

fn bootstrap_admin() -> Option<BootstrapAdmin> {
    match (
        optional("BOOTSTRAP_ADMIN_USERNAME"),
        optional("BOOTSTRAP_ADMIN_EMAIL"),
        optional("BOOTSTRAP_ADMIN_PASSWORD"),
    ) {
        (Some(username), Some(email), Some(password)) => Some(BootstrapAdmin {
            username,
            email,
            password,
        }),
        (None, None, None) => None,
        _ => {
            tracing::warn!(
                "BOOTSTRAP_ADMIN_USERNAME, BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD \
                 must be set together - skipping bootstrap administrator"
            );
            None
        }
    }
}
