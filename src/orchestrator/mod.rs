//! The fallback chain that turns a feed item link into full article HTML.
//!
//! Each invocation walks an explicit state machine:
//!
//! ```text
//! ResolveRealUrl -> RuleLookup -> RenderFirst ----------------> Archive -> Done
//!                             \-> StandardFetch -> Purify -> Readability
//!                                        \-----------------------\-> Archive -> Rendered -> Done
//! ```
//!
//! Archive and rendered fallbacks only run for URLs a rule resolved for.

pub mod archive;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::extractor::{ArticleExtractor, ReadabilityExtractor, ReadableArticle, strip_title_heading};
use crate::fetcher::{HttpFetcher, OutgoingRequest, shape};
use crate::purifier::Purifier;
use crate::render::RenderedFetcher;
use crate::rules::{RuleStore, SiteRule, host_of};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("all extraction strategies failed for {url}: {}", .reasons.join("; "))]
    TotalFailure { url: String, reasons: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Extracted text must be strictly longer than this to be accepted.
    pub min_text_len: usize,
    /// Mirror serving `/newest/<url>` snapshots.
    pub archive_base: String,
    /// Sites that refuse every non-browser client.
    pub render_first_domains: Vec<String>,
    /// URL fragments marking aggregator links that redirect via script.
    pub link_wrappers: Vec<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_text_len: 200,
            archive_base: "https://archive.is".to_string(),
            render_first_domains: vec!["bloomberg.com".to_string(), "wsj.com".to_string()],
            link_wrappers: vec!["news.google.com".to_string(), "google.com/rss/".to_string()],
        }
    }
}

/// Immutable inputs of one invocation once the rule is known.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub url: Url,
    pub title: String,
    pub rule: Option<Arc<SiteRule>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ResolveRealUrl,
    RuleLookup,
    RenderFirst,
    StandardFetch,
    Purify,
    Readability,
    Archive,
    Rendered,
    Done,
}

/// Mutable bookkeeping for one walk through the chain.
struct Run {
    request: ExtractionRequest,
    render_first: bool,
    page: Option<String>,
    accepted: Option<String>,
    last_resort: Option<String>,
    reasons: Vec<String>,
}

impl Run {
    fn fail(&mut self, stage: Stage, reason: impl std::fmt::Display) {
        debug!("{:?} fell through for {}: {}", stage, self.request.url, reason);
        self.reasons.push(format!("{stage:?}: {reason}"));
    }
}

#[derive(Clone)]
pub struct ExtractionOrchestrator {
    store: Arc<RuleStore>,
    fetcher: HttpFetcher,
    purifier: Purifier,
    renderer: Option<RenderedFetcher>,
    extractor: Arc<dyn ArticleExtractor>,
    settings: OrchestratorSettings,
}

impl ExtractionOrchestrator {
    pub fn new(store: Arc<RuleStore>, fetcher: HttpFetcher, settings: OrchestratorSettings) -> Self {
        Self {
            store,
            purifier: Purifier::new(fetcher.clone()),
            fetcher,
            renderer: None,
            extractor: Arc::new(ReadabilityExtractor),
            settings,
        }
    }

    pub fn with_renderer(mut self, renderer: RenderedFetcher) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArticleExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub async fn resolve_rule(&self, url: &str) -> Option<Arc<SiteRule>> {
        self.store.ensure_loaded().await;
        self.store.resolve(url)
    }

    pub async fn is_bypassable(&self, url: &str) -> bool {
        self.resolve_rule(url).await.is_some()
    }

    /// `(rule name, domain)` for every site with an active rule.
    pub async fn list_bypassable_sites(&self) -> Vec<(String, String)> {
        self.store.ensure_loaded().await;
        self.store.list_bypassable_sites()
    }

    /// Full article HTML for a feed item, trying every applicable strategy.
    #[instrument(skip(self))]
    pub async fn extract_full_content(
        &self,
        url: &str,
        title: &str,
    ) -> Result<String, ExtractionError> {
        let parsed = Url::parse(url).map_err(|source| ExtractionError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let mut run = Run {
            request: ExtractionRequest {
                url: parsed,
                title: title.to_string(),
                rule: None,
            },
            render_first: false,
            page: None,
            accepted: None,
            last_resort: None,
            reasons: Vec::new(),
        };

        let mut stage = Stage::ResolveRealUrl;
        while stage != Stage::Done {
            stage = self.step(stage, &mut run).await;
        }

        let title = &run.request.title;
        match run.accepted.or(run.last_resort) {
            Some(html) => {
                info!("Extracted full content for {}", run.request.url);
                Ok(strip_title_heading(&html, title))
            }
            None => {
                warn!("Every strategy failed for {}", run.request.url);
                Err(ExtractionError::TotalFailure {
                    url: run.request.url.to_string(),
                    reasons: run.reasons,
                })
            }
        }
    }

    async fn step(&self, stage: Stage, run: &mut Run) -> Stage {
        match stage {
            Stage::ResolveRealUrl => {
                self.resolve_real_url(run).await;
                Stage::RuleLookup
            }
            Stage::RuleLookup => {
                let rule = self.resolve_rule(run.request.url.as_str()).await;
                debug!(
                    "Rule for {}: {}",
                    run.request.url,
                    rule.as_ref()
                        .and_then(|r| r.domain.as_deref())
                        .unwrap_or("none")
                );
                run.render_first = rule.is_some()
                    && self.renderer.is_some()
                    && self.is_render_first(&run.request.url);
                run.request.rule = rule;
                if run.render_first {
                    Stage::RenderFirst
                } else {
                    Stage::StandardFetch
                }
            }
            Stage::RenderFirst => {
                if let Some(renderer) = &self.renderer {
                    let timeout = renderer.settings().render_first_timeout;
                    match self.rendered_article(renderer, run, stage, timeout).await {
                        Some(article) if self.long_enough(&article) => {
                            run.accepted = Some(article.html);
                        }
                        Some(article) => {
                            run.fail(stage, format!("only {} chars", article.text_len()))
                        }
                        None => run.fail(stage, "no article"),
                    }
                }
                if run.accepted.is_some() {
                    Stage::Done
                } else {
                    Stage::Archive
                }
            }
            Stage::StandardFetch => {
                let request = &run.request;
                let outgoing = match &request.rule {
                    Some(rule) => shape(&OutgoingRequest::get(request.url.clone()), rule),
                    None => OutgoingRequest::get(request.url.clone()),
                };
                match self.fetcher.fetch_page(&outgoing).await {
                    Ok(page) => {
                        run.page = Some(page.body_utf8);
                        Stage::Purify
                    }
                    Err(e) => {
                        if e.is_blocked() && request.rule.is_some() {
                            info!("{} refused the direct fetch, trying fallbacks", request.url);
                        }
                        run.fail(stage, e);
                        self.after_standard(run)
                    }
                }
            }
            Stage::Purify => {
                if let (Some(rule), Some(page)) = (&run.request.rule, &run.page)
                    && let Some(fragment) = self.purifier.purify(page, &run.request.url, rule).await
                {
                    debug!("Purifier extracted {}", run.request.url);
                    run.accepted = Some(fragment);
                    return Stage::Done;
                }
                Stage::Readability
            }
            Stage::Readability => {
                if let Some(page) = run.page.take() {
                    let base = run.request.url.clone();
                    match self.readable(&page, &base, run.request.rule.as_deref()) {
                        Some(article) if self.long_enough(&article) => {
                            run.accepted = Some(article.html);
                            return Stage::Done;
                        }
                        Some(article) => {
                            run.fail(stage, format!("only {} chars", article.text_len()));
                            run.last_resort = Some(article.html);
                        }
                        None => run.fail(stage, "no article"),
                    }

                    if let Some(html) = self.amp_attempt(&page, run).await {
                        run.accepted = Some(html);
                        return Stage::Done;
                    }
                }
                self.after_standard(run)
            }
            Stage::Archive => {
                let url = run.request.url.clone();
                match archive::fetch_snapshot(&self.fetcher, &self.settings.archive_base, &url).await {
                    Ok(html) => match self.extractor.extract(&html, &url) {
                        Some(article) if self.long_enough(&article) => {
                            debug!("Archive snapshot gave {} chars", article.text_len());
                            run.accepted = Some(article.html);
                            return Stage::Done;
                        }
                        Some(article) => {
                            run.fail(stage, format!("only {} chars", article.text_len()))
                        }
                        None => run.fail(stage, "no article"),
                    },
                    Err(e) => run.fail(stage, e),
                }
                if run.render_first {
                    Stage::Done
                } else {
                    Stage::Rendered
                }
            }
            Stage::Rendered => {
                match &self.renderer {
                    Some(renderer) => {
                        let timeout = renderer.settings().timeout;
                        match self.rendered_article(renderer, run, stage, timeout).await {
                            Some(article) => run.accepted = Some(article.html),
                            None => run.fail(stage, "no article"),
                        }
                    }
                    None => run.fail(stage, "no render engine configured"),
                }
                Stage::Done
            }
            Stage::Done => Stage::Done,
        }
    }

    async fn resolve_real_url(&self, run: &mut Run) {
        let url = &run.request.url;
        let wrapped = self
            .settings
            .link_wrappers
            .iter()
            .any(|marker| url.as_str().contains(marker.as_str()));
        if !wrapped {
            return;
        }

        let Some(renderer) = &self.renderer else {
            debug!("No render engine to unwrap {}", url);
            return;
        };
        let timeout = renderer.settings().redirect_timeout;
        match renderer.resolve_redirect(url, timeout).await {
            Some(resolved) => {
                info!("Resolved {} to {}", url, resolved);
                run.request.url = resolved;
            }
            None => warn!("Could not unwrap {}, keeping it", url),
        }
    }

    fn is_render_first(&self, url: &Url) -> bool {
        let Some(host) = host_of(url.as_str()) else {
            return false;
        };
        self.settings
            .render_first_domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }

    fn long_enough(&self, article: &ReadableArticle) -> bool {
        article.text_len() > self.settings.min_text_len
    }

    /// Rule transforms, then the generic readability pass.
    fn readable(&self, html: &str, url: &Url, rule: Option<&SiteRule>) -> Option<ReadableArticle> {
        match rule {
            Some(rule) => {
                let cleaned = self.purifier.clean_html(html, url, rule);
                self.extractor.extract(&cleaned, url)
            }
            None => self.extractor.extract(html, url),
        }
    }

    /// The AMP edition, for rules that point at one.
    async fn amp_attempt(&self, page: &str, run: &mut Run) -> Option<String> {
        let rule = run.request.rule.clone()?;
        let amp_url = self.purifier.amp_redirect_url(page, &run.request.url, &rule)?;
        debug!("Trying AMP edition {}", amp_url);

        let outgoing = shape(&OutgoingRequest::get(amp_url.clone()), &rule);
        let amp_page = match self.fetcher.fetch_page(&outgoing).await {
            Ok(page) => page,
            Err(e) => {
                run.fail(Stage::Readability, format!("AMP edition: {e}"));
                return None;
            }
        };

        let article = self.readable(&amp_page.body_utf8, &amp_url, Some(&rule))?;
        if self.long_enough(&article) {
            Some(article.html)
        } else {
            run.fail(Stage::Readability, format!("AMP edition only {} chars", article.text_len()));
            None
        }
    }

    async fn rendered_article(
        &self,
        renderer: &RenderedFetcher,
        run: &mut Run,
        stage: Stage,
        timeout: std::time::Duration,
    ) -> Option<ReadableArticle> {
        let url = run.request.url.clone();
        let rule = run.request.rule.clone();
        match renderer.fetch_rendered(&url, rule.as_deref(), timeout).await {
            Ok(html) => self.readable(&html, &url, rule.as_deref()),
            Err(e) => {
                run.fail(stage, e);
                None
            }
        }
    }

    fn after_standard(&self, run: &Run) -> Stage {
        if run.request.rule.is_some() {
            Stage::Archive
        } else {
            Stage::Done
        }
    }
}
