use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use ra_notify::config::{self, AppConfig};
use ra_notify::db::Store;
use ra_notify::mailer::SmtpMailer;
use ra_notify::pipeline::{self, RunReport};
use ra_notify::scraping::ra::RaSource;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match poll_once().await {
        Ok(report) => {
            tracing::info!(
                "run complete: {} entities checked, {} new, {} resurfaced, {} digests sent",
                report.entities_checked,
                report.new_events,
                report.resurfaced_events,
                report.dispatch.sent
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("run failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn poll_once() -> Result<RunReport> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = AppConfig::load(&config_path)?;
    let users = config::load_users(&config.users_path)?;

    let store = Store::open(&config.database_path()).context("unable to open event store")?;
    let source = Arc::new(RaSource::from_config(&config));
    let mailer =
        Arc::new(SmtpMailer::from_config(&config.smtp).context("smtp configuration error")?);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing decided work and committing");
            let _ = cancel_tx.send(true);
        }
    });

    let report = pipeline::run(&config, source, mailer, store, users, cancel_rx)
        .await
        .context("poll run failed before the store could commit")?;
    Ok(report)
}
