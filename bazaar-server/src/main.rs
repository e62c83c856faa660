//! bazaar-server: marketplace order, payment and wallet service
//!
//! Long-running service that:
//! - Serves the customer, seller and gateway-callback HTTP API
//! - Runs durable timers (auto-cancel, delivery confirmation, payment polls)
//! - Probes payment gateways and releases held orders when one is back

use std::net::SocketAddr;
use std::time::Duration;

use bazaar_server::api;
use bazaar_server::config::Config;
use bazaar_server::error::BoxError;
use bazaar_server::state::AppState;
use bazaar_server::tasks::{BackgroundTasks, TaskKind, TaskWorker};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bazaar_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting bazaar-server (env: {})", config.environment);

    let state = AppState::new(&config).await?;

    // Background loops
    let mut tasks = BackgroundTasks::new();
    let worker = TaskWorker::new(
        state.store.clone(),
        state.task_runner(),
        Duration::from_secs(config.task_poll_interval_secs),
    );
    let shutdown = tasks.shutdown_token();
    tasks.spawn("task_worker", TaskKind::Worker, worker.run(shutdown));

    let health_state = state.clone();
    tasks.spawn_periodic(
        "gateway_health",
        Duration::from_secs(config.gateway_health_interval_secs),
        move || {
            let state = health_state.clone();
            async move { state.refresh_gateways().await }
        },
    );
    tasks.log_summary();

    let app = api::create_router(state);
    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("bazaar-server HTTP listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
        }
        tracing::info!("Shutdown signal received");
    })
    .await?;

    tasks.shutdown().await;
    Ok(())
}
