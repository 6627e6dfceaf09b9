//! Strategies that leave the page: alternate JSON API links and JSON
//! source scripts. Discovery runs on the parsed document, fetching runs
//! afterwards on owned URLs.

use kuchiki::NodeRef;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::dom;
use crate::fetcher::HttpFetcher;
use crate::purifier::PurifyError;
use crate::purifier::structured::{paragraphs, text_field};
use crate::rules::model::UA_GOOGLEBOT;

/// `<link rel="alternate" type="application/json">`, made absolute.
pub fn discover_json_link(document: &NodeRef, base: &Url) -> Option<Url> {
    let link = dom::select_first(
        document,
        r#"link[rel="alternate"][type="application/json"][href]"#,
    )?;
    let href = dom::attr(&link, "href")?;
    base.join(href.trim()).ok()
}

/// External scripts whose absolute URL contains `pattern` or ends in `.json`.
pub fn discover_source_scripts(document: &NodeRef, base: &Url, pattern: &str) -> Vec<Url> {
    dom::select_all(document, "script[src]")
        .iter()
        .filter_map(|script| dom::attr(script, "src"))
        .filter_map(|src| base.join(src.trim()).ok())
        .filter(|src| src.as_str().contains(pattern) || src.path().ends_with(".json"))
        .collect()
}

/// Fetch an alternate JSON document and read WordPress-style
/// `content.rendered`, then `content`, then `articleBody`.
pub async fn fetch_json_link(
    fetcher: &HttpFetcher,
    url: &Url,
) -> Result<Option<String>, PurifyError> {
    let value = fetcher.fetch_json(url, UA_GOOGLEBOT).await?;
    if !value.is_object() {
        return Err(PurifyError::Parse(format!("{url} is not a JSON object")));
    }

    if let Some(rendered) = value
        .get("content")
        .and_then(|content| text_field(content, &["rendered"]))
    {
        return Ok(Some(format!("<div>{rendered}</div>")));
    }
    if let Some(content) = text_field(&value, &["content"]) {
        return Ok(Some(format!("<div>{content}</div>")));
    }
    Ok(text_field(&value, &["articleBody"]).map(paragraphs))
}

/// Try each candidate script in turn until one carries an article body.
pub async fn fetch_source_scripts(
    fetcher: &HttpFetcher,
    candidates: &[Url],
) -> Result<Option<String>, PurifyError> {
    let mut last_error = None;

    for url in candidates {
        match fetcher.fetch_json(url, UA_GOOGLEBOT).await {
            Ok(value) => {
                if let Some(body) = source_body(&value) {
                    return Ok(Some(paragraphs(body)));
                }
            }
            Err(e) => {
                debug!("Source script {} failed: {}", url, e);
                last_error = Some(PurifyError::Fetch(e));
            }
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

fn source_body(value: &Value) -> Option<&str> {
    text_field(value, &["articleBody", "text", "content"])
}
