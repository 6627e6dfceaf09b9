use kuchiki::NodeRef;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::dom;
use crate::rules::{SiteRule, host_of};

const DOMAIN_PLACEHOLDER: &str = "{domain}";

/// Compile a rule pattern, substituting `{domain}` with the escaped host.
pub fn domain_pattern(pattern: &str, url: &Url) -> Result<Regex, regex::Error> {
    let host = host_of(url.as_str()).unwrap_or_default();
    Regex::new(&pattern.replace(DOMAIN_PLACEHOLDER, &regex::escape(&host)))
}

/// Remove paywall scripts according to `block_regex`, `block_js` and
/// `block_js_inline`. A bad pattern disables only its own pass.
pub fn block_scripts(document: &NodeRef, url: &Url, rule: &SiteRule) {
    if let Some(pattern) = &rule.block_regex {
        match domain_pattern(pattern, url) {
            Ok(regex) => {
                let removed = remove_scripts(document, |src, body| match src {
                    Some(src) => regex.is_match(src),
                    None => regex.is_match(body),
                });
                debug!("block_regex removed {} scripts from {}", removed, url);
            }
            Err(e) => warn!("Skipping invalid block_regex {:?}: {}", pattern, e),
        }
    }

    if rule.block_js
        && let Some(host) = host_of(url.as_str())
    {
        remove_scripts(document, |src, _| src.is_some_and(|src| src.contains(&host)));
    }

    if let Some(pattern) = &rule.block_js_inline {
        match domain_pattern(pattern, url) {
            Ok(regex) if regex.is_match(url.as_str()) => {
                remove_scripts(document, |src, _| src.is_none());
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping invalid block_js_inline {:?}: {}", pattern, e),
        }
    }
}

/// Detach every `<script>` for which `matches(src, inline_body)` holds.
fn remove_scripts<F>(document: &NodeRef, matches: F) -> usize
where
    F: Fn(Option<&str>, &str) -> bool,
{
    let mut removed = 0;
    for script in dom::select_all(document, "script") {
        let src = dom::attr(&script, "src");
        let body = if src.is_some() {
            String::new()
        } else {
            script.as_node().text_contents()
        };
        if matches(src.as_deref(), &body) {
            script.as_node().detach();
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::RawRule;
    use serde_json::json;

    fn rule(value: serde_json::Value) -> SiteRule {
        SiteRule::from(serde_json::from_value::<RawRule>(value).unwrap())
    }

    fn scripts_left(document: &NodeRef) -> Vec<String> {
        dom::select_all(document, "script")
            .iter()
            .map(|s| dom::attr(s, "src").unwrap_or_else(|| s.as_node().text_contents()))
            .collect()
    }

    #[test]
    fn test_block_regex_removes_only_matching_script() {
        let document = dom::parse(
            r#"<html><head><script src="nytimes.com/paywall.js"></script>
               <script src="https://cdn.example.net/analytics.js"></script></head></html>"#,
        );
        let url = Url::parse("https://www.nytimes.com/2024/story.html").unwrap();
        block_scripts(&document, &url, &rule(json!({"block_regex": "{domain}/paywall\\.js"})));

        assert_eq!(
            scripts_left(&document),
            vec!["https://cdn.example.net/analytics.js".to_string()]
        );
    }

    #[test]
    fn test_block_regex_matches_inline_body() {
        let document = dom::parse(
            "<script>window.meter = 3;</script><script>console.log('ok')</script>",
        );
        let url = Url::parse("https://example.com/a").unwrap();
        block_scripts(&document, &url, &rule(json!({"block_regex": "meter"})));

        assert_eq!(scripts_left(&document), vec!["console.log('ok')".to_string()]);
    }

    #[test]
    fn test_block_js_removes_same_host_sources() {
        let document = dom::parse(
            r#"<script src="https://static.example.com/app.js"></script>
               <script src="https://other.org/lib.js"></script><script>inline()</script>"#,
        );
        let url = Url::parse("https://www.example.com/a").unwrap();
        block_scripts(&document, &url, &rule(json!({"block_js": 1})));

        assert_eq!(
            scripts_left(&document),
            vec!["https://other.org/lib.js".to_string(), "inline()".to_string()]
        );
    }

    #[test]
    fn test_block_js_inline_keyed_by_url() {
        let html = r#"<script src="https://a.com/x.js"></script><script>inline()</script>"#;
        let url = Url::parse("https://www.faz.net/aktuell/story.html").unwrap();

        let document = dom::parse(html);
        block_scripts(&document, &url, &rule(json!({"block_js_inline": "{domain}/aktuell/"})));
        assert_eq!(scripts_left(&document), vec!["https://a.com/x.js".to_string()]);

        let document = dom::parse(html);
        block_scripts(&document, &url, &rule(json!({"block_js_inline": "{domain}/sport/"})));
        assert_eq!(scripts_left(&document).len(), 2);
    }

    #[test]
    fn test_invalid_pattern_is_ignored() {
        let document = dom::parse("<script>a()</script>");
        let url = Url::parse("https://example.com/").unwrap();
        block_scripts(&document, &url, &rule(json!({"block_regex": "(unclosed"})));
        assert_eq!(scripts_left(&document).len(), 1);
    }
}
