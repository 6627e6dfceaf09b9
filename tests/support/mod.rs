#![allow(dead_code)]

use async_trait::async_trait;
use feedbypass::{
    dom,
    extractor::{ArticleExtractor, ReadableArticle},
    render::{ContextOptions, RenderContext, RenderEngine, RenderError},
    rules::{BaseCatalog, RuleStore},
};
use std::collections::VecDeque;
use std::future::pending;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

/// Rule catalog on disk with a single entry for the loopback host every
/// mock server listens on.
pub struct CatalogFixture {
    pub dir: TempDir,
    pub base_path: PathBuf,
}

impl CatalogFixture {
    pub fn with_local_rule(rule: serde_json::Value) -> Self {
        let mut entry = rule;
        entry["domain"] = serde_json::Value::String("127.0.0.1".to_string());
        Self::with_catalog(serde_json::json!({ "Local": entry }))
    }

    pub fn with_catalog(catalog: serde_json::Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base_path = dir.path().join("base.json");
        std::fs::write(&base_path, serde_json::to_vec(&catalog).unwrap()).unwrap();
        Self { dir, base_path }
    }

    pub fn store(&self) -> Arc<RuleStore> {
        Arc::new(RuleStore::new(
            BaseCatalog::File(self.base_path.clone()),
            self.dir.path().join("data"),
        ))
    }
}

/// Takes the first `<article>` verbatim; deterministic where readability
/// heuristics are not.
#[derive(Debug, Default)]
pub struct ArticleTagExtractor;

impl ArticleExtractor for ArticleTagExtractor {
    fn extract(&self, html: &str, _base_url: &Url) -> Option<ReadableArticle> {
        let document = dom::parse(html);
        let article = dom::select_first(&document, "article")?;
        let text = article.as_node().text_contents().trim().to_string();
        if text.is_empty() {
            return None;
        }
        Some(ReadableArticle {
            title: None,
            text,
            html: article.as_node().to_string(),
        })
    }
}

/// An `<article>` long enough to pass the default acceptance threshold.
pub fn long_article(marker: &str) -> String {
    let body = format!("{marker} ").repeat(60);
    format!("<html><body><article><p>{body}</p></article></body></html>")
}

pub fn short_article(marker: &str) -> String {
    format!("<html><body><article><p>{marker}</p></article></body></html>")
}

#[derive(Debug, Default)]
pub struct EngineCounters {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub user_agents: Mutex<Vec<String>>,
    pub scripts: Mutex<Vec<String>>,
}

impl EngineCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Render engine that serves canned content and counts context lifecycles.
#[derive(Clone)]
pub struct FakeEngine {
    pub counters: Arc<EngineCounters>,
    html: String,
    hang_on_load: bool,
    navigations: Vec<Url>,
    open_delay: Duration,
    load_delay: Duration,
}

impl FakeEngine {
    pub fn serving(html: impl Into<String>) -> Self {
        Self {
            counters: Arc::default(),
            html: html.into(),
            hang_on_load: false,
            navigations: Vec::new(),
            open_delay: Duration::ZERO,
            load_delay: Duration::ZERO,
        }
    }

    /// Every page load never finishes.
    pub fn hanging() -> Self {
        Self {
            hang_on_load: true,
            ..Self::serving("")
        }
    }

    pub fn redirecting(steps: &[&str]) -> Self {
        Self {
            navigations: steps.iter().map(|s| Url::parse(s).unwrap()).collect(),
            ..Self::serving("")
        }
    }

    /// Slow browser: opening a context and loading a page each take a while.
    pub fn with_delays(mut self, open: Duration, load: Duration) -> Self {
        self.open_delay = open;
        self.load_delay = load;
        self
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open(&self, options: ContextOptions) -> Result<Box<dyn RenderContext>, RenderError> {
        tokio::time::sleep(self.open_delay).await;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.counters
            .user_agents
            .lock()
            .unwrap()
            .push(options.user_agent);
        Ok(Box::new(FakeContext {
            counters: self.counters.clone(),
            html: self.html.clone(),
            hang_on_load: self.hang_on_load,
            navigations: self.navigations.iter().cloned().collect(),
            load_delay: self.load_delay,
        }))
    }
}

struct FakeContext {
    counters: Arc<EngineCounters>,
    html: String,
    hang_on_load: bool,
    navigations: VecDeque<Url>,
    load_delay: Duration,
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn navigate(&mut self, _url: &Url) -> Result<(), RenderError> {
        Ok(())
    }

    async fn wait_for_load(&mut self) -> Result<(), RenderError> {
        if self.hang_on_load {
            pending::<()>().await;
        }
        tokio::time::sleep(self.load_delay).await;
        Ok(())
    }

    async fn next_navigation(&mut self) -> Result<Option<Url>, RenderError> {
        Ok(self.navigations.pop_front())
    }

    async fn evaluate(&mut self, script: &str) -> Result<(), RenderError> {
        self.counters.scripts.lock().unwrap().push(script.to_string());
        Ok(())
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        Ok(self.html.clone())
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
