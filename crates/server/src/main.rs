mod bootstrap;
mod health;
mod routes;

use std::future::IntoFuture;

use anyhow::Result;
use querydesk_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use querydesk_core::config::LogFormat::*;
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

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let router = routes::router(app.orchestrator.clone()).merge(health::router(app.db_pool.clone()));

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        datasets = app.config.datasets.len(),
        "querydesk-server started"
    );

    // In-flight requests get a bounded drain window after the signal.
    let grace_secs = app.config.server.graceful_shutdown_secs;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    let mut drain_rx = shutdown_rx.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = drain_rx.changed().await;
        })
        .into_future();

    let mut deadline_rx = shutdown_rx;
    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = deadline_rx.changed().await;
            tokio::time::sleep(std::time::Duration::from_secs(grace_secs)).await;
        } => {
            tracing::warn!(
                event_name = "system.server.shutdown_deadline",
                grace_secs,
                "graceful shutdown deadline exceeded, exiting"
            );
        }
    }

    tracing::info!(event_name = "system.server.stopping", "querydesk-server stopping");
    Ok(())
}
