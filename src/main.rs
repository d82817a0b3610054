use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use claude_remote::config::{Config, Settings};
use claude_remote::sweeper;
use claude_remote::web::WebServer;
use claude_remote_core::SessionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    let registry = Arc::new(
        SessionRegistry::with_default_spawner(settings.session.clone())
            .context("Failed to initialize session registry")?,
    );

    if settings.session.tmux.discover_on_start {
        let adopted = registry.discover().await;
        tracing::info!(count = adopted.len(), "Adopted existing tmux sessions");
    }

    let sweeper = sweeper::spawn(registry.clone(), settings.server.health_interval_secs);

    let server = WebServer::new(settings.server.clone(), registry.clone());
    let result = server.run(shutdown_signal()).await;

    if let Some(handle) = sweeper {
        handle.abort();
    }

    let report = registry.shutdown_all().await;
    tracing::info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        "All sessions shut down"
    );

    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("claude_remote=debug,claude_remote_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("claude_remote=info,claude_remote_core=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
