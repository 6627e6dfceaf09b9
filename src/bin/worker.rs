use anyhow::{Context, Result};
use feedbypass::{config::Config, fetcher::HttpFetcher, jobs::RuleUpdateService, rules::RuleStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store = Arc::new(RuleStore::new(config.base_catalog(), config.data_dir()));
    store.ensure_loaded().await;

    let fetcher = HttpFetcher::new(Duration::from_secs(30)).context("building HTTP client")?;
    let service = RuleUpdateService::new(
        store.clone(),
        fetcher,
        config.sync_url().clone(),
        config.data_dir(),
    )
    .with_retry(config.retry_policy());

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal, stopping rule sync...");
        signal_token.cancel();
    });

    service
        .run_periodic(config.sync_interval(), shutdown_token)
        .await;
    Ok(())
}
