use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fetcher::{FetchError, HttpFetcher};
use crate::jobs::backoff::with_jitter;
use crate::jobs::retry::{RetryOutcome, RetryPolicy, RetryableTask};
use crate::rules::{RuleStore, catalog::parse_catalog};

pub const DEFAULT_SYNC_URL: &str =
    "https://gitflic.ru/project/magnolia1234/bpc_updates/blob/raw?file=sites_updated.json";

/// Digest of the last applied remote catalog, stored next to the override file.
pub const VERSION_FILE_NAME: &str = "rules_version.txt";

const SYNC_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Updated { hash: String },
    Unchanged,
    /// Nothing was applied; the previously published rules stay active.
    Failed(String),
}

impl SyncOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, SyncOutcome::Updated { .. })
    }
}

/// Keeps the local override catalog in step with the remote list.
pub struct RuleUpdateService {
    store: Arc<RuleStore>,
    fetcher: HttpFetcher,
    source: Url,
    version_path: PathBuf,
    retry: RetryPolicy,
}

impl RuleUpdateService {
    pub fn new(
        store: Arc<RuleStore>,
        fetcher: HttpFetcher,
        source: Url,
        data_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            store,
            fetcher,
            source,
            version_path: data_dir.as_ref().join(VERSION_FILE_NAME),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn version_path(&self) -> &Path {
        &self.version_path
    }

    /// Hash of the last applied catalog, if one was ever applied.
    pub async fn current_version(&self) -> Option<String> {
        let stored = tokio::fs::read_to_string(&self.version_path).await.ok()?;
        let stored = stored.trim();
        (!stored.is_empty()).then(|| stored.to_string())
    }

    /// Download the remote catalog and apply it when its digest changed.
    ///
    /// Never returns an error: every failure leaves the current rules in place
    /// and is reported as [`SyncOutcome::Failed`].
    #[instrument(skip_all, fields(source = %self.source))]
    pub async fn check_and_update(&self) -> SyncOutcome {
        let body = match self.download().await {
            Ok(body) => body,
            Err(reason) => {
                warn!("Rule sync failed: {}", reason);
                return SyncOutcome::Failed(reason);
            }
        };

        if body.trim().is_empty() {
            warn!("Rule sync returned an empty body");
            return SyncOutcome::Failed("empty body".to_string());
        }

        let hash = format!("{:x}", md5::compute(body.as_bytes()));
        if self.current_version().await.as_deref() == Some(hash.as_str()) {
            debug!("Remote rules unchanged ({})", hash);
            return SyncOutcome::Unchanged;
        }

        if let Err(e) = parse_catalog(body.as_bytes(), "remote") {
            warn!("Rejecting remote rules: {}", e);
            return SyncOutcome::Failed(e.to_string());
        }

        match self.store.save_override(body.as_bytes()).await {
            Ok(report) => {
                info!(
                    "Applied remote rules {} ({} domains)",
                    hash, report.domains
                );
            }
            Err(e) => {
                warn!("Could not apply remote rules: {}", e);
                return SyncOutcome::Failed(e.to_string());
            }
        }

        if let Err(e) = tokio::fs::write(&self.version_path, &hash).await {
            // Rules are applied; the next check just downloads them again
            warn!("Could not record rules version: {}", e);
        }
        SyncOutcome::Updated { hash }
    }

    async fn download(&self) -> Result<String, String> {
        let outcome = RetryableTask::new(self.retry.clone())
            .retry_if(FetchError::should_retry)
            .on_retry(|attempt, error| debug!("Sync attempt {} failed: {}", attempt, error))
            .run(|_| self.fetcher.fetch_text(&self.source, SYNC_USER_AGENT))
            .await;

        match outcome {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Failure { final_error, .. } => Err(final_error.to_string()),
        }
    }

    /// Check on a fixed interval (with jitter) until `token` is cancelled.
    /// The first check runs immediately.
    pub async fn run_periodic(&self, interval: Duration, token: CancellationToken) {
        info!("Rule sync every {:?} from {}", interval, self.source);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.check_and_update() => {
                    debug!("Rule sync outcome: {:?}", outcome);
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(with_jitter(interval)) => {}
            }
        }
        info!("Rule sync stopped");
    }
}
