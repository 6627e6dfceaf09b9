use readability::extractor;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::extractor::cleaner::sanitize_and_resolve_links;
use crate::extractor::model::ReadableArticle;

/// Generic "find the main article" pass over a full HTML document.
///
/// The orchestrator is handed one of these so tests can substitute a
/// deterministic implementation.
pub trait ArticleExtractor: Send + Sync {
    fn extract(&self, html: &str, base_url: &Url) -> Option<ReadableArticle>;
}

/// Mozilla-readability port, with a selector heuristic when it gives up.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadabilityExtractor;

impl ArticleExtractor for ReadabilityExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> Option<ReadableArticle> {
        let mut article = match extractor::extract(&mut html.as_bytes(), base_url) {
            Ok(product) => ReadableArticle {
                title: Some(product.title).filter(|t| !t.trim().is_empty()),
                text: product.text,
                html: product.content,
            },
            Err(e) => {
                debug!("Readability failed for {}: {}", base_url, e);
                fallback_extract(html)?
            }
        };

        sanitize_and_resolve_links(&mut article, base_url);

        if article.text.trim().is_empty() {
            return None;
        }
        Some(article)
    }
}

fn fallback_extract(html: &str) -> Option<ReadableArticle> {
    let document = Html::parse_document(html);
    let (text, html_content) = extract_main_content(&document);

    if text.trim().is_empty() {
        return None;
    }

    Some(ReadableArticle {
        title: extract_title(&document),
        text,
        html: html_content,
    })
}

fn extract_title(document: &Html) -> Option<String> {
    if let Ok(selector) = Selector::parse("meta[property='og:title']")
        && let Some(content) = document
            .select(&selector)
            .find_map(|element| element.value().attr("content"))
    {
        return Some(content.to_string());
    }

    ["title", "h1"].iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        document
            .select(&selector)
            .map(|element| element.text().collect::<String>().trim().to_string())
            .find(|title| !title.is_empty())
    })
}

fn extract_main_content(document: &Html) -> (String, String) {
    const CONTENT_SELECTORS: [&str; 9] = [
        "article",
        "main",
        "[role='main']",
        ".article-body",
        ".entry-content",
        ".content",
        ".post",
        "#content",
        "#main",
    ];

    for selector_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element.text().collect::<String>();
            if text.trim().len() > 100 {
                return (text, element.html());
            }
        }
    }

    if let Ok(body_selector) = Selector::parse("body")
        && let Some(body) = document.select(&body_selector).next()
    {
        return (body.text().collect(), body.inner_html());
    }

    (String::new(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_prefers_article_element() {
        let body = "Lorem ipsum dolor sit amet. ".repeat(10);
        let html = format!(
            "<html><head><meta property='og:title' content='OG Title'></head>\
             <body><nav>menu</nav><article><p>{body}</p></article></body></html>"
        );
        let article = fallback_extract(&html).unwrap();
        assert_eq!(article.title.as_deref(), Some("OG Title"));
        assert!(article.html.starts_with("<article>"));
        assert!(!article.text.contains("menu"));
    }

    #[test]
    fn test_fallback_uses_body_for_short_pages() {
        let html = "<html><head><title> Short </title></head><body><p>tiny</p></body></html>";
        let article = fallback_extract(html).unwrap();
        assert_eq!(article.title.as_deref(), Some("Short"));
        assert_eq!(article.html, "<p>tiny</p>");
    }

    #[test]
    fn test_empty_document_yields_nothing() {
        let url = Url::parse("https://example.com/a").unwrap();
        assert!(ReadabilityExtractor.extract("<html><body></body></html>", &url).is_none());
    }

    #[test]
    fn test_readability_extracts_paragraphs() {
        let paragraph = "The council voted on Tuesday to approve the new budget, \
                         which increases spending on schools and public transport. "
            .repeat(6);
        let html = format!(
            "<html><head><title>Budget passes</title></head><body>\
             <div class='sidebar'><a href='/x'>Related</a></div>\
             <div class='story'><p>{paragraph}</p><p>{paragraph}</p></div></body></html>"
        );
        let url = Url::parse("https://example.com/news/budget").unwrap();
        let article = ReadabilityExtractor.extract(&html, &url).unwrap();
        assert!(article.text.contains("council voted"));
        assert!(!article.html.contains("<script"));
    }
}
