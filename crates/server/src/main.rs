mod api;
mod audit;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use axum::Router;
use underwrite_core::config::{AppConfig, LoadOptions};

use crate::bootstrap::Application;

fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use underwrite_core::config::LogFormat::*;

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
    let config = bootstrap::load_config(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "underwrite-server listening"
    );

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let router = routes(&app);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            result??;
            app.db_pool.close().await;
            return Ok(());
        }
        () = wait_for_shutdown() => {}
    }

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => result??,
        Err(_) => {
            server.abort();
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish within the grace period"
            );
        }
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "underwrite-server stopping"
    );
    app.db_pool.close().await;

    Ok(())
}

fn routes(app: &Application) -> Router {
    let health = health::router(health::HealthState {
        db_pool: app.db_pool.clone(),
        sessions: app.services.sessions.clone(),
        llm_provider: app.config.llm.provider.as_str(),
        scoring_mode: app.config.scoring.mode.as_str(),
    });
    let api = api::router(api::ApiState {
        runtime: app.services.runtime.clone(),
        sessions: app.services.sessions.clone(),
    });
    health.merge(api)
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
