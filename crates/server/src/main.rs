mod bootstrap;
mod health;
mod service;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use botforge_core::config::{AppConfig, LoadOptions};
use botforge_telegram::{
    HttpUpdateTransport, LongPollRunner, NoopUpdateTransport, ReconnectPolicy, UpdateTransport,
};

use crate::service::OrchestratorCommandService;

fn init_logging(config: &AppConfig) {
    use botforge_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler_task = tokio::spawn(app.reconciler.run(shutdown_rx.clone()));

    let transport: Arc<dyn UpdateTransport> = match &app.config.telegram.bot_token {
        Some(token) => Arc::new(HttpUpdateTransport::new(token)?),
        None => Arc::new(NoopUpdateTransport),
    };
    tracing::info!(
        event_name = "system.server.telegram_transport_mode",
        transport_mode = if app.config.telegram.bot_token.is_some() { "http" } else { "noop" },
        "telegram transport initialized"
    );

    let runner = LongPollRunner::new(
        transport,
        OrchestratorCommandService::new(Arc::clone(&app.orchestrator)),
        Duration::from_secs(app.config.telegram.poll_timeout_secs),
        ReconnectPolicy::default(),
    );
    let poll_task = tokio::spawn(runner.run(shutdown_rx));

    tracing::info!(event_name = "system.server.started", "botforge server started");
    wait_for_shutdown().await?;
    tracing::info!(event_name = "system.server.stopping", "botforge server stopping");

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        let _ = poll_task.await;
        let _ = reconciler_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            grace_secs = grace.as_secs(),
            "background tasks did not stop within the grace period"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
