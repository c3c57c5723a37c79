use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;

use identity_service::{
    build_router,
    config::IdentityConfig,
    db,
    models::GrantType,
    services::{
        cache::RedisSecurityCache,
        credential::{CredentialValidator, PgCredentialStore},
        directory::{PgIdentityDirectory, PgNamespaceDirectory, PgPolicyEngine},
        issuer::{IssuerRegistry, PasswordIssuer, PrivateTokenIssuer},
        store::PgSessionStore,
        TokenService,
    },
    AppState,
};
use service_core::observability::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;
    config.token.validate()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    tracing::info!("Initializing database connection");
    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::Error::new(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::Error::new(e)))?;

    let cache = Arc::new(RedisSecurityCache::connect(&config.redis.url).await?);
    tracing::info!("Redis security cache initialized");

    let store = Arc::new(PgSessionStore::new(pool.clone()));
    let directory = Arc::new(PgIdentityDirectory::new(pool.clone()));
    let policy = Arc::new(PgPolicyEngine::new(pool.clone()));
    let namespaces = Arc::new(PgNamespaceDirectory::new(pool.clone()));

    let mut registry = IssuerRegistry::new();
    registry.register(
        GrantType::Password,
        Arc::new(PasswordIssuer::new(directory, config.token.clone())),
    );
    registry.register(
        GrantType::PrivateToken,
        Arc::new(PrivateTokenIssuer::new(store.clone(), config.token.clone())),
    );
    tracing::info!("Token issuers registered: password, private_token");

    let tokens = Arc::new(TokenService::new(
        store,
        registry,
        policy,
        namespaces,
        cache.clone(),
        config.token.clone(),
        config.security.clone(),
    ));

    let credentials = Arc::new(CredentialValidator::new(Arc::new(PgCredentialStore::new(
        pool.clone(),
    ))));

    let state = AppState {
        config: config.clone(),
        pool,
        tokens,
        credentials,
        cache,
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
