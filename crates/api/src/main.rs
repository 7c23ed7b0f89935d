// API server clippy configuration
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Pointgate API Server
//!
//! Serves authentication, configuration, metered generation, rewards and
//! point purchases.

use std::net::SocketAddr;

use axum::http::{header, HeaderValue, Method};
use axum::middleware;
use pointgate_shared::{
    create_migration_pool, create_pool, run_migrations, AccountRepository, AccountStatus,
    NewAccount, PgAccountRepository, Privilege,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pointgate_api::{
    auth::{hash_password, validate_password_strength},
    config::{BootstrapAdmin, Config},
    routes::create_router,
    security::security_headers_middleware,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!("Starting Pointgate API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        let migration_pool = create_migration_pool(&config.database_url).await?;
        run_migrations(&migration_pool).await?;
        migration_pool.close().await;
        tracing::info!("Database migrations applied");
    } else {
        tracing::info!("Database migrations skipped (RUN_MIGRATIONS=false)");
    }

    if let Some(admin) = &config.bootstrap_admin {
        let accounts = PgAccountRepository::new(pool.clone());
        ensure_bootstrap_admin(&accounts, admin).await?;
    }

    let state = AppState::new(pool, config.clone())?;

    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .expose_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = create_router(state)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to one JSON object per line
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,pointgate_api=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Create the configured administrator unless an account with that login exists
async fn ensure_bootstrap_admin(
    accounts: &dyn AccountRepository,
    admin: &BootstrapAdmin,
) -> anyhow::Result<()> {
    if accounts.find_credentials(&admin.username).await?.is_some() {
        tracing::debug!(username = %admin.username, "Bootstrap administrator already present");
        return Ok(());
    }

    validate_password_strength(&admin.password)?;
    let password_hash = hash_password(&admin.password)?;
    let created = accounts
        .create_account(NewAccount {
            username: admin.username.clone(),
            email: admin.email.clone(),
            password_hash,
            balance: 0,
            privilege: Privilege::Administrator,
            status: AccountStatus::Active,
        })
        .await?;

    tracing::info!(user_id = %created.user_id, username = %created.username, "Bootstrap administrator created");
    Ok(())
}
