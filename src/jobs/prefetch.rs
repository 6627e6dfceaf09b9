use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::orchestrator::ExtractionOrchestrator;

/// A feed item that may be worth fetching ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchCandidate {
    pub url: String,
    pub title: String,
    pub published: Option<DateTime<Utc>>,
}

impl PrefetchCandidate {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            published: None,
        }
    }

    pub fn published_at(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }
}

/// Where extracted article HTML is kept, keyed by article URL.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn has_content(&self, url: &str) -> bool;
    async fn store_content(&self, url: &str, html: String);
}

/// Recent feed items, newest first.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn recent(&self, limit: usize) -> Vec<PrefetchCandidate>;
}

#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    entries: DashMap<String, String>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<String> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn has_content(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    async fn store_content(&self, url: &str, html: String) {
        self.entries.insert(url.to_string(), html);
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    pub concurrency: usize,
    pub latest_limit: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            latest_limit: 30,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchReport {
    pub fetched: usize,
    /// Already cached, or no rule for the site.
    pub skipped: usize,
    pub failed: usize,
}

enum ItemResult {
    Fetched,
    Skipped,
    Failed,
}

/// Fills a [`ContentStore`] for bypassable articles in the background.
pub struct Prefetcher {
    orchestrator: Arc<ExtractionOrchestrator>,
    content: Arc<dyn ContentStore>,
    config: PrefetchConfig,
}

impl Prefetcher {
    pub fn new(
        orchestrator: Arc<ExtractionOrchestrator>,
        content: Arc<dyn ContentStore>,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            orchestrator,
            content,
            config,
        }
    }

    pub async fn prefetch(&self, candidates: Vec<PrefetchCandidate>) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for candidate in candidates {
            if !self.orchestrator.is_bypassable(&candidate.url).await {
                report.skipped += 1;
                continue;
            }
            if self.content.has_content(&candidate.url).await {
                debug!("Already cached: {}", candidate.url);
                report.skipped += 1;
                continue;
            }

            let orchestrator = self.orchestrator.clone();
            let content = self.content.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ItemResult::Failed;
                };
                fetch_one(&orchestrator, content.as_ref(), candidate).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ItemResult::Fetched) => report.fetched += 1,
                Ok(ItemResult::Skipped) => report.skipped += 1,
                Ok(ItemResult::Failed) => report.failed += 1,
                Err(e) => {
                    warn!("Prefetch task panicked: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Prefetch finished: {} fetched, {} skipped, {} failed",
            report.fetched, report.skipped, report.failed
        );
        report
    }

    /// Prefetch up to `limit` of the newest bypassable items. Three times as
    /// many recent items are scanned, since most feeds are not paywalled.
    pub async fn prefetch_latest(&self, source: &dyn CandidateSource, limit: usize) -> PrefetchReport {
        let mut recent = source.recent(limit.saturating_mul(3)).await;
        // Newest first; undated items keep their source order after the dated ones.
        recent.sort_by(|a, b| b.published.cmp(&a.published));

        let mut chosen = Vec::with_capacity(limit);
        for candidate in recent {
            if chosen.len() == limit {
                break;
            }
            if self.orchestrator.is_bypassable(&candidate.url).await {
                chosen.push(candidate);
            }
        }
        debug!("{} bypassable candidates among recent items", chosen.len());
        self.prefetch(chosen).await
    }
}

async fn fetch_one(
    orchestrator: &ExtractionOrchestrator,
    content: &dyn ContentStore,
    candidate: PrefetchCandidate,
) -> ItemResult {
    // Another run may have filled it while this one waited for a permit
    if content.has_content(&candidate.url).await {
        return ItemResult::Skipped;
    }
    match orchestrator
        .extract_full_content(&candidate.url, &candidate.title)
        .await
    {
        Ok(html) if !html.trim().is_empty() => {
            content.store_content(&candidate.url, html).await;
            ItemResult::Fetched
        }
        Ok(_) => {
            debug!("Empty content for {}", candidate.url);
            ItemResult::Failed
        }
        Err(e) => {
            debug!("Prefetch failed for {}: {}", candidate.url, e);
            ItemResult::Failed
        }
    }
}
