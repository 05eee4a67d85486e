use media_catalog::{
    AppState,
    auth::{AuthState, MockAuthBackend},
    config::{AppConfig, Env},
    create_router,
    gotrue::GoTrueAuthClient,
    memory::MemoryRepository,
    repository::{PostgresRepository, RepositoryState},
    storage::{S3StorageClient, StorageService, StorageState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, wires the backends, resolves the session, starts the background
/// listeners, and serves HTTP until SIGINT/SIGTERM.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast in production)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: pretty locally, JSON in production.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "media_catalog=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Repository: Postgres when configured, in memory otherwise (local only).
    let mut background = Vec::new();
    let repo: RepositoryState = match &config.db_url {
        Some(db_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("FATAL: Database migrations failed.");

            let postgres = Arc::new(PostgresRepository::new(pool));
            match postgres.spawn_change_listener().await {
                Ok(handle) => background.push(handle),
                Err(e) => tracing::warn!(error = %e, "taxonomy change feed unavailable"),
            }
            postgres as RepositoryState
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory repository");
            Arc::new(MemoryRepository::seeded(&["ação", "assistir", "comédia", "drama"]))
        }
    };

    // 4. Storage (S3/MinIO/Supabase)
    let s3_client = S3StorageClient::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_key,
        &config.s3_secret,
        &config.s3_bucket,
        &config.s3_public_url,
    )
    .await;

    if config.env == Env::Local {
        s3_client.ensure_bucket_exists().await;
    }
    let storage = Arc::new(s3_client) as StorageState;

    // 5. Auth: GoTrue when configured, in memory otherwise (local only).
    let auth: AuthState = match &config.supabase_url {
        Some(url) => {
            let client = Arc::new(GoTrueAuthClient::new(
                url,
                &config.supabase_anon_key,
                config.supabase_service_key.clone(),
                &config.jwt_secret,
                config.session_file.clone(),
            ));
            background.push(client.spawn_auto_refresh());
            client as AuthState
        }
        None => {
            tracing::warn!("SUPABASE_URL not set, using the in-memory auth backend");
            Arc::new(MockAuthBackend::new())
        }
    };

    // 6. State, session resolution, and the reconciliation listener.
    let bind_addr = config.bind_addr.clone();
    let app_state = AppState::new(repo, storage, auth, config);
    app_state.session.start().await;
    background.push(app_state.catalog.spawn_category_listener());

    let session = app_state.session.clone();
    let app = create_router(app_state);

    // 7. Serve
    let listener = TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("FATAL: cannot bind {}: {}", bind_addr, e));

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    session.shutdown();
    for handle in background {
        handle.stop();
    }
    tracing::info!("Shutdown complete");
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
