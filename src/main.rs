use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zotride::api::auth::GoogleVerifier;
use zotride::api::rate_limit::spawn_cleanup_task;
use zotride::cli::{run_command, Cli};
use zotride::config::Config;
use zotride::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.is_serve() {
        // Client commands print to stdout; keep logs quiet and on stderr
        let log_level = cli.log_level.as_deref().unwrap_or("warn");
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        return run_command(&cli).await;
    }

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ZotRide v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;

    let db = zotride::db::init(&config.server.data_dir).await?;

    let identity = Arc::new(GoogleVerifier::new(config.auth.google_client_id.clone()));
    let state = Arc::new(AppState::new(config.clone(), db, identity));

    let shutdown = CancellationToken::new();
    spawn_cleanup_task(
        state.rate_limiter.clone(),
        Duration::from_secs(config.rate_limit.window_seconds.max(1)),
        shutdown.clone(),
    );

    let app = zotride::api::create_router(state);

    let api_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind {}", api_addr))?;

    tracing::info!("API server listening on http://{}", api_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
