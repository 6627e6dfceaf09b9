//! Rule-driven DOM and script level extraction.
//!
//! `purify` tries each configured strategy in priority order and returns
//! the first fragment found. `clean_html` applies only the transforms that
//! prepare a page for the generic readability pass.

pub mod remote;
pub mod scripts;
pub mod structured;
pub mod transforms;

use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::dom;
use crate::fetcher::{FetchError, HttpFetcher};
use crate::rules::SiteRule;

#[derive(Error, Debug)]
pub enum PurifyError {
    #[error("Malformed document: {0}")]
    Parse(String),

    #[error("Invalid rule pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

/// Everything `purify` needs after the document has been dropped.
#[derive(Debug, Default)]
struct LocalPass {
    fragment: Option<String>,
    json_link: Option<Url>,
    source_scripts: Vec<Url>,
}

#[derive(Clone, Debug)]
pub struct Purifier {
    fetcher: HttpFetcher,
}

impl Purifier {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }

    /// First non-empty fragment from the rule's extraction strategies.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn purify(&self, html: &str, url: &Url, rule: &SiteRule) -> Option<String> {
        let local = self.local_pass(html, url, rule);
        if local.fragment.is_some() {
            return local.fragment;
        }

        if let Some(link) = &local.json_link {
            let result = remote::fetch_json_link(&self.fetcher, link).await;
            if let Some(fragment) = swallow("ld_json_url", result) {
                return Some(fragment);
            }
        }

        if !local.source_scripts.is_empty() {
            let result = remote::fetch_source_scripts(&self.fetcher, &local.source_scripts).await;
            if let Some(fragment) = swallow("ld_json_source", result) {
                return Some(fragment);
            }
        }

        debug!("No purifier strategy matched {}", url);
        None
    }

    /// Script blocking, then the in-document strategies. Also records what
    /// the network strategies should fetch.
    fn local_pass(&self, html: &str, url: &Url, rule: &SiteRule) -> LocalPass {
        let document = dom::parse(html);
        scripts::block_scripts(&document, url, rule);

        let directives = &rule.structured;
        if directives.ld_json.is_some()
            && let Some(fragment) = swallow("ld_json", structured::ld_json(&document))
        {
            return LocalPass {
                fragment: Some(fragment),
                ..LocalPass::default()
            };
        }

        if directives.ld_json_next.is_some()
            && let Some(fragment) = swallow("ld_json_next", structured::next_data(&document))
        {
            return LocalPass {
                fragment: Some(fragment),
                ..LocalPass::default()
            };
        }

        LocalPass {
            fragment: None,
            json_link: directives
                .ld_json_url
                .as_ref()
                .and_then(|_| remote::discover_json_link(&document, url)),
            source_scripts: directives
                .ld_json_source
                .as_deref()
                .map(|pattern| remote::discover_source_scripts(&document, url, pattern))
                .unwrap_or_default(),
        }
    }

    /// Non-extracting transforms only: script blocking, AMP unhide and the
    /// rule's DOM operations. Reapplying it to its own output is a no-op.
    pub fn clean_html(&self, html: &str, url: &Url, rule: &SiteRule) -> String {
        let document = dom::parse(html);
        scripts::block_scripts(&document, url, rule);
        if rule.amp_unhide {
            transforms::amp_unhide(&document);
        }
        transforms::apply_dom_operations(&document, &rule.dom_ops);
        dom::serialize(&document)
    }

    /// The AMP edition of a page for rules with `amp_redirect`: the page's
    /// `amphtml` link, else the canonical URL with an `amp` query flag.
    pub fn amp_redirect_url(&self, html: &str, url: &Url, rule: &SiteRule) -> Option<Url> {
        let mode = rule.amp_redirect.as_deref()?;
        let document = dom::parse(html);

        let linked = |selector: &str| {
            dom::select_first(&document, selector)
                .and_then(|link| dom::attr(&link, "href"))
                .and_then(|href| url.join(href.trim()).ok())
        };

        if let Some(amp) = linked(r#"link[rel="amphtml"][href]"#) {
            return Some(amp);
        }
        if mode != "amp" {
            return None;
        }

        let mut canonical = linked(r#"link[rel="canonical"][href]"#).unwrap_or_else(|| url.clone());
        let query = match canonical.query() {
            Some(query) if !query.is_empty() => format!("{query}&amp"),
            _ => "amp".to_string(),
        };
        canonical.set_query(Some(&query));
        Some(canonical)
    }
}

fn swallow(strategy: &str, result: Result<Option<String>, PurifyError>) -> Option<String> {
    match result {
        Ok(Some(fragment)) if !fragment.trim().is_empty() => {
            debug!("Purifier strategy {} produced {} bytes", strategy, fragment.len());
            Some(fragment)
        }
        Ok(_) => None,
        Err(e) => {
            warn!("Purifier strategy {} failed: {}", strategy, e);
            None
        }
    }
}
