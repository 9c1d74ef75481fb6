//! footfall server
//!
//! Run with: cargo run
//!
//! Configuration is read once from the environment; see the `config`
//! module for the full list. RUST_LOG controls the log level
//! (default: footfall=info,tower_http=info).

use footfall::api::run_server;
use footfall::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "footfall=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    tracing::info!("footfall configuration:");
    tracing::info!("  Host: {}:{}", config.server.host, config.server.port);
    tracing::info!("  Database: {}", config.database_path.display());
    tracing::info!(
        "  Alert threshold: {} visitors within {} min",
        config.alerts.threshold,
        config.alerts.window_minutes()
    );
    tracing::info!(
        "  Alert cadence: every {} min",
        config.alerts.cadence.as_secs() / 60
    );
    tracing::info!("  Alert sender: {}", config.alerts.sender);
    tracing::info!("  Alert recipients: {}", config.alerts.recipients.len());
    match (&config.mail.smtp, &config.mail.webhook_url) {
        (Some(smtp), _) => tracing::info!("  Dispatch: SMTP via {}:{}", smtp.host, smtp.port),
        (None, Some(url)) => tracing::info!("  Dispatch: webhook {}", url),
        (None, None) => tracing::info!("  Dispatch: log only (no EMAIL_HOST or ALERT_WEBHOOK_URL)"),
    }
    if config.alerts.recipients.is_empty() && config.mail.smtp.is_some() {
        tracing::warn!("ALERT_EMAIL_RECIPIENTS is empty; alert emails will fail to send");
    }

    run_server(config).await
}
