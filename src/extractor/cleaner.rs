use ammonia::Builder;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

use crate::dom;
use crate::extractor::model::{ReadableArticle, normalize_whitespace};

static LINK_ATTR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b(href|src)="([^"]+)""#).unwrap());

/// Strip scripts, styles and unsafe attributes, make links absolute and
/// tidy the text.
pub fn sanitize_and_resolve_links(article: &mut ReadableArticle, base_url: &Url) {
    let clean_html = Builder::default().clean(&article.html).to_string();
    article.html = resolve_links(&clean_html, base_url);
    article.text = normalize_whitespace(&article.text);
}

fn resolve_links(html: &str, base_url: &Url) -> String {
    LINK_ATTR_REGEX
        .replace_all(html, |caps: &Captures| match base_url.join(&caps[2]) {
            Ok(absolute) => format!(r#"{}="{}""#, &caps[1], absolute),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

/// Remove the first `<h1>` whose text is the article title, since the
/// title is shown separately.
pub fn strip_title_heading(html: &str, title: &str) -> String {
    let title = title.trim();
    if title.is_empty() {
        return html.to_string();
    }

    let document = dom::parse(html);
    let heading = dom::select_all(&document, "h1")
        .into_iter()
        .find(|h1| h1.as_node().text_contents().trim() == title);

    match heading {
        Some(h1) => {
            h1.as_node().detach();
            dom::body_inner_html(&document)
        }
        None => html.to_string(),
    }
}
