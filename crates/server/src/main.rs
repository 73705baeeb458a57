mod audit;
mod bootstrap;
mod notify;
mod service;
mod sweeper;
pub mod api;
pub mod health;

use std::sync::Arc;

use anyhow::Result;
use permitly_core::config::{AppConfig, LoadOptions};
use permitly_db::repositories::{
    SqlHistoryRepository, SqlPermitRepository, SqlPermitTypeRepository,
};

use crate::audit::TracingAuditSink;
use crate::notify::{NoopNotifier, Notifier, WebhookNotifier};
use crate::service::PermitService;
use crate::sweeper::ExpirySweeper;

fn init_logging(config: &AppConfig) {
    use permitly_core::config::LogFormat::*;
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

    let notifier: Arc<dyn Notifier> = match &app.config.notifications.webhook_url {
        Some(url) => {
            Arc::new(WebhookNotifier::new(url.clone(), app.config.notifications.timeout_secs)?)
        }
        None => Arc::new(NoopNotifier),
    };

    let permits = Arc::new(SqlPermitRepository::new(app.db_pool.clone()));
    let service = Arc::new(PermitService::new(
        permits.clone(),
        Arc::new(SqlPermitTypeRepository::new(app.db_pool.clone())),
        Arc::new(SqlHistoryRepository::new(app.db_pool.clone())),
        Arc::new(TracingAuditSink),
        notifier,
    ));

    if app.config.sweeper.enabled {
        ExpirySweeper::new(service.clone(), permits, app.config.sweeper.interval_secs).spawn();
        tracing::info!(
            event_name = "system.sweeper.started",
            correlation_id = "bootstrap",
            permit_id = "unknown",
            interval_secs = app.config.sweeper.interval_secs,
            "expiry sweeper started"
        );
    } else {
        tracing::info!(
            event_name = "system.sweeper.disabled",
            correlation_id = "bootstrap",
            permit_id = "unknown",
            "expiry sweeper disabled by configuration"
        );
    }

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        permit_id = "unknown",
        bind_address = %address,
        "permitly-server started"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, api::router(service))
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        permit_id = "unknown",
        "permitly-server stopping"
    );

    // In-flight requests get the configured grace window, then we stop waiting.
    let _ = shutdown_tx.send(());
    let grace = std::time::Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let _ = tokio::time::timeout(grace, server).await;

    Ok(())
}
