//! streak-core server entry point.
//!
//! Wires the store and push transport, starts the scheduler driver and
//! serves the REST API until SIGINT or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::http::StatusCode;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use streak_core::api;
use streak_core::app_state::AppState;
use streak_core::config::ServiceConfig;
use streak_core::persistence::{MemoryStore, PostgresStore};
use streak_core::transport::{DryRunTransport, ExpoPushTransport, PushTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting streak-core");

    let transport = build_transport(&config)?;

    let app_state = match config.postgres_url() {
        Some(url) => {
            let store = PostgresStore::connect(
                url,
                config.database_max_connections,
                config.database_min_connections,
                Duration::from_secs(config.database_connect_timeout_secs),
            )
            .await
            .context("failed to connect to PostgreSQL")?;
            store.migrate().await.context("failed to apply migrations")?;
            tracing::info!("using PostgreSQL store");
            AppState::from_store(Arc::new(store), transport, &config)
        }
        None => {
            tracing::warn!("DATABASE_URL not set or persistence disabled, using in-memory store");
            AppState::from_store(Arc::new(MemoryStore::new()), transport, &config)
        }
    };

    // Scheduler driver
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_handle = if config.scheduler.enabled {
        let driver = (*app_state.driver).clone();
        Some(tokio::spawn(driver.run(shutdown_rx)))
    } else {
        tracing::info!("scheduler driver disabled");
        None
    };

    let app = build_app(&config, app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped, waiting for scheduler driver");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = driver_handle
        && tokio::time::timeout(Duration::from_secs(10), handle).await.is_err()
    {
        tracing::warn!("scheduler driver did not stop in time");
    }

    Ok(())
}

/// Installs the global subscriber. `LOG_FORMAT=json` selects JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_transport(config: &ServiceConfig) -> anyhow::Result<Arc<dyn PushTransport>> {
    match &config.push_endpoint {
        Some(endpoint) => {
            let transport = ExpoPushTransport::new(
                endpoint.clone(),
                config.push_access_token.clone(),
                config.scheduler.external_call_timeout(),
            )?;
            tracing::info!(endpoint = %transport.endpoint(), "using push gateway");
            Ok(Arc::new(transport))
        }
        None => {
            tracing::warn!("PUSH_ENDPOINT not set, notifications are logged only");
            Ok(Arc::new(DryRunTransport))
        }
    }
}

fn build_app(config: &ServiceConfig, app_state: AppState) -> Router {
    let router = api::build_router(config.scheduler.http_trigger);

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };

    router
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
