use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use feedbypass::{
    config::Config,
    fetcher::HttpFetcher,
    jobs::{RuleUpdateService, SyncOutcome},
    orchestrator::ExtractionOrchestrator,
    rules::RuleStore,
};
use std::sync::Arc;
use std::time::Duration;

/// Fetch full article text for feed items behind paywalls.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the extracted article HTML for a URL
    Extract {
        url: String,
        /// Feed title, used to drop a duplicated heading
        #[arg(default_value = "")]
        title: String,
    },
    /// List every site with an active rule
    Sites,
    /// Pull the remote rule list once
    Sync,
    /// Show the rule that applies to a URL
    Rule { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = Arc::new(RuleStore::new(config.base_catalog(), config.data_dir()));
    let fetcher = HttpFetcher::new(Duration::from_secs(30)).context("building HTTP client")?;

    match cli.command {
        Command::Extract { url, title } => {
            let orchestrator = build_orchestrator(&config, store, fetcher).await?;
            let html = orchestrator.extract_full_content(&url, &title).await?;
            println!("{html}");
        }
        Command::Sites => {
            store.ensure_loaded().await;
            for (name, domain) in store.list_bypassable_sites() {
                println!("{domain}\t{name}");
            }
        }
        Command::Sync => {
            store.ensure_loaded().await;
            let service = RuleUpdateService::new(
                store.clone(),
                fetcher,
                config.sync_url().clone(),
                config.data_dir(),
            )
            .with_retry(config.retry_policy());
            match service.check_and_update().await {
                SyncOutcome::Updated { hash } => println!("updated ({hash})"),
                SyncOutcome::Unchanged => println!("unchanged"),
                SyncOutcome::Failed(reason) => bail!("sync failed: {reason}"),
            }
        }
        Command::Rule { url } => {
            store.ensure_loaded().await;
            match store.resolve(&url) {
                Some(rule) => println!("{rule:#?}"),
                None => println!("no rule for {url}"),
            }
        }
    }

    Ok(())
}

#[cfg(feature = "chromium")]
async fn build_orchestrator(
    config: &Config,
    store: Arc<RuleStore>,
    fetcher: HttpFetcher,
) -> Result<ExtractionOrchestrator> {
    use feedbypass::render::{RenderedFetcher, chromium::ChromiumEngine};

    let engine = ChromiumEngine::launch().await.context("launching headless browser")?;
    let renderer = RenderedFetcher::new(Arc::new(engine), config.render_settings());
    Ok(
        ExtractionOrchestrator::new(store, fetcher, config.orchestrator_settings())
            .with_renderer(renderer),
    )
}

#[cfg(not(feature = "chromium"))]
async fn build_orchestrator(
    config: &Config,
    store: Arc<RuleStore>,
    fetcher: HttpFetcher,
) -> Result<ExtractionOrchestrator> {
    Ok(ExtractionOrchestrator::new(
        store,
        fetcher,
        config.orchestrator_settings(),
    ))
}
