mod bootstrap;
mod bot;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use crmbot_agent::AgentRuntime;
use crmbot_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging(config: &AppConfig) {
    use crmbot_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the loaded config, so it comes up before bootstrap.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let router = build_router(&app);

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let sweeper = spawn_session_sweeper(app.runtime.clone(), app.config.agent.session_ttl());

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "crmbot-server listening"
    );
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;
    sweeper.abort();
    tracing::info!(event_name = "system.server.stopping", correlation_id = "shutdown", "crmbot-server stopping");

    Ok(())
}

fn build_router(app: &bootstrap::Application) -> Router {
    Router::new()
        .merge(bot::router(app.runtime.clone()))
        .merge(health::router(app.action_log.clone()))
        .layer(bot::cors_layer(&app.config.server.allowed_origins))
}

fn spawn_session_sweeper(runtime: Arc<AgentRuntime>, ttl: Duration) -> tokio::task::JoinHandle<()> {
    let period = ttl.min(MAX_SWEEP_INTERVAL).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            runtime.sessions().sweep_expired().await;
        }
    })
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            error = %error,
            "failed to listen for ctrl-c; shutting down"
        );
    }
}
