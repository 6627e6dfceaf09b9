//! Headless rendering for pages that only yield their article to a real
//! browser, and for resolving script-driven redirects.
//!
//! Every render runs in its own task that owns the context. The task races
//! the work against its deadline and a cancellation token, then closes the
//! context on the single path out, so teardown happens exactly once whether
//! the work finished, timed out or the caller went away.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod filter;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

pub use filter::RequestFilter;

use crate::fetcher::{OutgoingRequest, shape};
use crate::rules::SiteRule;

/// Mobile Chrome, used when the rule does not pick a user agent.
pub const RENDER_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 6 Build/TQ3A.230805.001) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

const OVERLAY_SELECTORS: &str = "[class*=paywall],[class*=Paywall],[id*=paywall],[class*=gateway],[class*=modal-backdrop],[class*=piano]";
const CLIPPED_SELECTORS: &str = "[class*=truncate],[class*=fade-out],[class*=article-body]";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Render timed out after {0:?}")]
    Timeout(Duration),

    #[error("Render cancelled")]
    Cancelled,

    #[error("Render engine error: {0}")]
    Engine(String),
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub timeout: Duration,
    /// Bound for sites that are rendered before anything else is tried.
    pub render_first_timeout: Duration,
    pub redirect_timeout: Duration,
    /// Wait after the cleanup script for trailing async rendering.
    pub settle_delay: Duration,
    pub max_contexts: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            render_first_timeout: Duration::from_secs(20),
            redirect_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(5),
            max_contexts: 2,
        }
    }
}

/// How a fresh context is set up before the first navigation.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub clear_cookies: bool,
    pub filter: RequestFilter,
}

/// A browser able to open isolated contexts.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn open(&self, options: ContextOptions) -> Result<Box<dyn RenderContext>, RenderError>;
}

/// One isolated page. Requests rejected by the context's filter never reach
/// the network.
#[async_trait]
pub trait RenderContext: Send {
    /// Start loading `url` in the main frame.
    async fn navigate(&mut self, url: &Url) -> Result<(), RenderError>;

    /// Resolves once the current document has finished loading.
    async fn wait_for_load(&mut self) -> Result<(), RenderError>;

    /// Next main-frame navigation target; `None` once no more will come.
    async fn next_navigation(&mut self) -> Result<Option<Url>, RenderError>;

    async fn evaluate(&mut self, script: &str) -> Result<(), RenderError>;

    /// Serialized DOM of the current document.
    async fn content(&mut self) -> Result<String, RenderError>;

    async fn close(&mut self) -> Result<(), RenderError>;
}

/// The single way a render session ends.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionOutcome<T> {
    Completed(T),
    TimedOut,
    Cancelled,
    Failed(RenderError),
}

impl<T> SessionOutcome<T> {
    fn into_result(self, limit: Duration) -> Result<T, RenderError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::TimedOut => Err(RenderError::Timeout(limit)),
            Self::Cancelled => Err(RenderError::Cancelled),
            Self::Failed(e) => Err(e),
        }
    }
}

type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RenderError>> + Send + 'a>>;

#[derive(Clone)]
pub struct RenderedFetcher {
    engine: Arc<dyn RenderEngine>,
    settings: RenderSettings,
    permits: Arc<Semaphore>,
}

impl RenderedFetcher {
    pub fn new(engine: Arc<dyn RenderEngine>, settings: RenderSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_contexts.max(1)));
        Self {
            engine,
            settings,
            permits,
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Render `url` under the rule's identity and return the cleaned DOM.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_rendered(
        &self,
        url: &Url,
        rule: Option<&SiteRule>,
        timeout: Duration,
    ) -> Result<String, RenderError> {
        let options = context_options(url, rule);
        let script = cleanup_script(rule.is_some_and(|r| r.clear_local_storage));
        let settle = self.settings.settle_delay;
        let target = url.clone();

        let outcome = self
            .session(options, timeout, move |context| {
                Box::pin(async move {
                    context.navigate(&target).await?;
                    context.wait_for_load().await?;
                    context.evaluate(&script).await?;
                    tokio::time::sleep(settle).await;
                    context.content().await
                })
            })
            .await;

        match &outcome {
            SessionOutcome::Completed(html) => {
                debug!("Rendered {} ({} bytes)", url, html.len());
            }
            other => warn!("Render of {} ended without content: {}", url, outcome_kind(other)),
        }
        outcome.into_result(timeout)
    }

    /// Follow script-driven redirects until the main frame leaves the
    /// starting site's domain family. `None` on timeout or dead end.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn resolve_redirect(&self, url: &Url, timeout: Duration) -> Option<Url> {
        let options = ContextOptions {
            user_agent: RENDER_USER_AGENT.to_string(),
            headers: Vec::new(),
            clear_cookies: false,
            filter: RequestFilter::for_redirect(),
        };
        let stem = url.host_str().and_then(family_stem).map(str::to_string);
        let target = url.clone();

        let outcome = self
            .session(options, timeout, move |context| {
                Box::pin(async move {
                    context.navigate(&target).await?;
                    while let Some(next) = context.next_navigation().await? {
                        debug!("Redirect step to {}", next);
                        if !in_family(&next, stem.as_deref()) {
                            return Ok(Some(next));
                        }
                    }
                    Ok(None)
                })
            })
            .await;

        match outcome {
            SessionOutcome::Completed(Some(resolved)) => {
                debug!("Resolved {} to {}", url, resolved);
                Some(resolved)
            }
            SessionOutcome::Completed(None) => {
                warn!("Redirect chain from {} never left its site", url);
                None
            }
            other => {
                warn!("Redirect resolution for {} failed: {}", url, outcome_kind(&other));
                None
            }
        }
    }

    /// Run `work` against a fresh context in a dedicated task.
    ///
    /// `limit` bounds the whole session: waiting for a free context, opening
    /// it and the work share one deadline. Dropping the returned future
    /// cancels the task, which still closes the context before exiting.
    async fn session<T, F>(&self, options: ContextOptions, limit: Duration, work: F) -> SessionOutcome<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut Box<dyn RenderContext>) -> SessionFuture<'a, T> + Send + 'static,
    {
        let deadline = Instant::now() + limit;
        let cancel = CancellationToken::new();
        // Cancels the task if this future is dropped before it finishes.
        let _guard = cancel.clone().drop_guard();
        let engine = self.engine.clone();
        let permits = self.permits.clone();

        let task = tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionOutcome::Cancelled,
                permit = timeout_at(deadline, permits.acquire_owned()) => match permit {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return SessionOutcome::Failed(RenderError::Engine("render pool closed".to_string())),
                    Err(_) => {
                        debug!("No render context freed up within {:?}", limit);
                        return SessionOutcome::TimedOut;
                    }
                },
            };

            let mut context = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionOutcome::Cancelled,
                opened = timeout_at(deadline, engine.open(options)) => match opened {
                    Ok(Ok(context)) => context,
                    Ok(Err(e)) => return SessionOutcome::Failed(e),
                    Err(_) => return SessionOutcome::TimedOut,
                },
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => SessionOutcome::Cancelled,
                result = timeout_at(deadline, work(&mut context)) => match result {
                    Ok(Ok(value)) => SessionOutcome::Completed(value),
                    Ok(Err(e)) => SessionOutcome::Failed(e),
                    Err(_) => SessionOutcome::TimedOut,
                },
            };

            if let Err(e) = context.close().await {
                warn!("Closing render context failed: {}", e);
            }
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => SessionOutcome::Failed(RenderError::Engine(e.to_string())),
        }
    }
}

fn outcome_kind<T>(outcome: &SessionOutcome<T>) -> &'static str {
    match outcome {
        SessionOutcome::Completed(_) => "completed",
        SessionOutcome::TimedOut => "timed out",
        SessionOutcome::Cancelled => "cancelled",
        SessionOutcome::Failed(_) => "failed",
    }
}

/// Identity and blocking for a rendered fetch, derived from the same
/// shaping the plain HTTP path uses.
pub fn context_options(url: &Url, rule: Option<&SiteRule>) -> ContextOptions {
    let Some(rule) = rule else {
        return ContextOptions {
            user_agent: RENDER_USER_AGENT.to_string(),
            headers: Vec::new(),
            clear_cookies: true,
            filter: RequestFilter::for_rule(url, None),
        };
    };

    let shaped = shape(&OutgoingRequest::get(url.clone()), rule);
    let user_agent = shaped
        .header_str(USER_AGENT)
        .unwrap_or(RENDER_USER_AGENT)
        .to_string();
    let headers = shaped
        .headers
        .iter()
        .filter(|(name, _)| name.as_str() != USER_AGENT.as_str())
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();

    ContextOptions {
        user_agent,
        headers,
        clear_cookies: rule.cookies.clears_all(),
        filter: RequestFilter::for_rule(url, Some(rule)),
    }
}

/// Script run after load: drop paywall overlays, undo height clipping and
/// scroll locks, optionally wipe local storage.
pub fn cleanup_script(clear_local_storage: bool) -> String {
    let mut script = String::from("(function(){");
    script.push_str(&format!(
        "document.querySelectorAll('{OVERLAY_SELECTORS}').forEach(function(e){{e.remove();}});"
    ));
    script.push_str(&format!(
        "document.querySelectorAll('{CLIPPED_SELECTORS}').forEach(function(e){{e.style.maxHeight='none';e.style.overflow='visible';}});"
    ));
    script.push_str("document.body.style.overflow='visible';");
    script.push_str("document.documentElement.style.overflow='visible';");
    if clear_local_storage {
        script.push_str("try{localStorage.clear();}catch(e){}");
    }
    script.push_str("})();");
    script
}

const SECOND_LEVEL_LABELS: [&str; 7] = ["co", "com", "org", "net", "gov", "ac", "edu"];

/// The label naming a site's domain family: `google` for
/// `news.google.com` and for `www.google.co.uk`.
fn family_stem(host: &str) -> Option<&str> {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    match labels.len() {
        0 => None,
        1 => labels.first().copied(),
        n => {
            let candidate = labels[n - 2];
            if n >= 3 && SECOND_LEVEL_LABELS.contains(&candidate) {
                Some(labels[n - 3])
            } else {
                Some(candidate)
            }
        }
    }
}

fn in_family(url: &Url, stem: Option<&str>) -> bool {
    match (url.host_str(), stem) {
        (Some(host), Some(stem)) => host.split('.').any(|label| label == stem),
        _ => true,
    }
}
