use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::rules::{
    catalog::{CatalogDocument, merge, parse_catalog},
    errors::RuleError,
    index::DomainIndex,
    model::SiteRule,
};

const BUNDLED_CATALOG: &str = include_str!("../../assets/sites.json");

/// File name of the locally persisted override catalog.
pub const OVERRIDE_FILE_NAME: &str = "sites_updated.json";

/// Where the read-only base catalog comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseCatalog {
    Bundled,
    File(PathBuf),
}

/// Outcome of a successful load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub entries: usize,
    pub domains: usize,
    pub warnings: Vec<RuleError>,
}

/// Owner of the published [`DomainIndex`].
///
/// Readers take a cheap `Arc` snapshot; loads build a complete new index off
/// to the side and swap it in under a short write lock. Loads are serialized
/// by an async mutex so concurrent `ensure_loaded` callers share one load.
pub struct RuleStore {
    base: BaseCatalog,
    override_path: PathBuf,
    index: RwLock<Arc<DomainIndex>>,
    loaded: AtomicBool,
    load_lock: Mutex<()>,
    last_error: RwLock<Option<String>>,
}

impl RuleStore {
    pub fn new(base: BaseCatalog, data_dir: impl AsRef<Path>) -> Self {
        Self {
            base,
            override_path: data_dir.as_ref().join(OVERRIDE_FILE_NAME),
            index: RwLock::new(Arc::new(DomainIndex::default())),
            loaded: AtomicBool::new(false),
            load_lock: Mutex::new(()),
            last_error: RwLock::new(None),
        }
    }

    /// Store backed by the bundled catalog only, with overrides under `data_dir`.
    pub fn bundled(data_dir: impl AsRef<Path>) -> Self {
        Self::new(BaseCatalog::Bundled, data_dir)
    }

    pub fn override_path(&self) -> &Path {
        &self.override_path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Load once. Callers arriving while a load is running wait for it instead
    /// of starting another.
    pub async fn ensure_loaded(&self) {
        if self.is_loaded() {
            return;
        }
        let _guard = self.load_lock.lock().await;
        if self.is_loaded() {
            return;
        }
        if let Err(e) = self.load_locked().await {
            error!("Error loading bypass rules: {}", e);
        }
    }

    /// Reload both catalogs and publish a fresh index.
    ///
    /// On [`RuleError::Fatal`] the previously published index stays in place.
    pub async fn load(&self) -> Result<LoadReport, RuleError> {
        let _guard = self.load_lock.lock().await;
        self.load_locked().await
    }

    async fn load_locked(&self) -> Result<LoadReport, RuleError> {
        let mut warnings = Vec::new();

        let base = match self.read_base().await {
            Ok(doc) => Some(doc),
            Err(e) => {
                error!("Base rule catalog unusable: {}", e);
                warnings.push(e);
                None
            }
        };

        let overlay = match self.read_override().await {
            Ok(doc) => doc,
            Err(e) => {
                error!("Error loading updated rules, using base rules only: {}", e);
                warnings.push(e);
                None
            }
        };

        if base.is_none() && overlay.is_none() {
            let message = warnings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            self.record_error(Some(message.clone()));
            return Err(RuleError::Fatal(message));
        }

        let empty = CatalogDocument::new();
        let rules = merge(
            base.as_ref().unwrap_or(&empty),
            overlay.as_ref().unwrap_or(&empty),
            &mut warnings,
        );
        let index = DomainIndex::build(&rules);

        let report = LoadReport {
            entries: rules.len(),
            domains: index.len(),
            warnings,
        };

        self.publish(index);
        self.loaded.store(true, Ordering::Release);
        self.record_error(report.warnings.first().map(ToString::to_string));

        info!(
            "Loaded {} bypass rules from {} named entries",
            report.domains, report.entries
        );
        Ok(report)
    }

    async fn read_base(&self) -> Result<CatalogDocument, RuleError> {
        match &self.base {
            BaseCatalog::Bundled => parse_catalog(BUNDLED_CATALOG.as_bytes(), "base"),
            BaseCatalog::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| RuleError::io(path.display(), e))?;
                parse_catalog(&bytes, "base")
            }
        }
    }

    async fn read_override(&self) -> Result<Option<CatalogDocument>, RuleError> {
        match tokio::fs::read(&self.override_path).await {
            Ok(bytes) => parse_catalog(&bytes, "override").map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No override catalog at {}", self.override_path.display());
                Ok(None)
            }
            Err(e) => Err(RuleError::io(self.override_path.display(), e)),
        }
    }

    fn publish(&self, index: DomainIndex) {
        let mut slot = self.index.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(index);
    }

    fn record_error(&self, message: Option<String>) {
        let mut slot = self.last_error.write().unwrap_or_else(|e| e.into_inner());
        *slot = message;
    }

    /// Persist a new override catalog and reload.
    ///
    /// The file is written to a sibling temp file first and renamed into place
    /// so a crash never leaves a truncated catalog behind.
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub async fn save_override(&self, bytes: &[u8]) -> Result<LoadReport, RuleError> {
        if let Some(dir) = self.override_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| RuleError::io(dir.display(), e))?;
        }
        let tmp = self.override_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| RuleError::io(tmp.display(), e))?;
        tokio::fs::rename(&tmp, &self.override_path)
            .await
            .map_err(|e| RuleError::io(self.override_path.display(), e))?;

        let report = self.load().await;
        match &report {
            Ok(_) => debug!("Updated rules saved and reloaded"),
            Err(e) => warn!("Updated rules saved but reload failed: {}", e),
        }
        report
    }

    /// Current index snapshot. Never blocks on a running load.
    pub fn snapshot(&self) -> Arc<DomainIndex> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<SiteRule>> {
        self.snapshot().resolve(url)
    }

    pub fn is_bypassable(&self, url: &str) -> bool {
        self.resolve(url).is_some()
    }

    pub fn list_bypassable_sites(&self) -> Vec<(String, String)> {
        self.snapshot().sites()
    }

    pub fn bypassable_domains(&self) -> BTreeSet<String> {
        self.snapshot().domains()
    }

    /// Most recent load diagnostic, if the last load reported one.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bundled_catalog_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::bundled(dir.path());

        let report = store.load().await.unwrap();
        assert!(report.warnings.is_empty());
        assert!(store.is_loaded());
        assert!(store.is_bypassable("https://www.nytimes.com/2024/01/01/world/story.html"));
        assert!(!store.is_bypassable("https://retired-paper.com/a"));
        assert!(!store.is_bypassable("https://example.org/"));
    }

    #[tokio::test]
    async fn test_resolve_before_load_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::bundled(dir.path());
        assert!(store.resolve("https://nytimes.com/").is_none());

        store.ensure_loaded().await;
        assert!(store.resolve("https://nytimes.com/").is_some());
    }

    #[tokio::test]
    async fn test_group_expansion_in_bundled_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::bundled(dir.path());
        store.ensure_loaded().await;

        let sites = store.list_bypassable_sites();
        assert!(sites.contains(&("Tribune Publishing".to_string(), "chicagotribune.com".to_string())));
        assert!(!sites.iter().any(|(_, d)| d.starts_with('#')));
        assert!(store.bypassable_domains().contains("nydailynews.com"));
    }
}
