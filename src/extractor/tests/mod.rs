use url::Url;

use crate::extractor::{ArticleExtractor, ReadabilityExtractor, strip_title_heading};

const NEWS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Sample Article | News Site</title>
  <meta property="og:title" content="Sample Article">
  <style>body { color: red; }</style>
</head>
<body>
  <nav><a href="/">Home</a> <a href="/world">World</a></nav>
  <article>
    <h1>Sample Article</h1>
    <p>This is the first paragraph of the sample article. It carries enough words to look like
       real reporting, with names, places and a few numbers like 42 and 1999.</p>
    <p>This is the second paragraph, which links to a <a href="/related">related story</a>
       and keeps going for a while so the scorer has something to work with.</p>
    <img src="images/sample.jpg" alt="Sample">
    <p>A third paragraph closes the piece with a quote from someone who was there and saw it all.</p>
  </article>
  <script>trackPageView();</script>
  <footer>Copyright News Site</footer>
</body>
</html>"#;

fn base() -> Url {
    Url::parse("https://example.com/news/article").unwrap()
}

#[test]
fn test_extract_news_page() {
    let article = ReadabilityExtractor.extract(NEWS_PAGE, &base()).unwrap();

    assert!(article.text.contains("first paragraph"));
    assert!(article.text.contains("second paragraph"));
    assert!(!article.html.contains("<script"));
    assert!(!article.html.contains("<style"));
    assert!(!article.html.contains("trackPageView"));
    assert!(article.html.contains("https://example.com/related"));
}

#[test]
fn test_malformed_html_is_tolerated() {
    let html = "<html><head><title>Broken</title><body><p>Unclosed tags<div>More content";
    if let Some(article) = ReadabilityExtractor.extract(html, &base()) {
        assert!(article.text.contains("Unclosed tags"));
    }
}

#[test]
fn test_title_heading_removed_from_extracted_html() {
    let article = ReadabilityExtractor
        .extract(
            &format!(
                "<html><body><article><h1>Valid Article</h1><p>{}</p></article></body></html>",
                "Enough words to count as a real article body. ".repeat(20)
            ),
            &base(),
        )
        .unwrap();

    let stripped = strip_title_heading(&article.html, "Valid Article");
    assert!(!stripped.contains(">Valid Article</h1>"));
    assert!(stripped.contains("Enough words"));
}

#[cfg(feature = "fuzz")]
mod fuzz {
    use super::*;
    use crate::fetcher::HttpFetcher;
    use crate::purifier::Purifier;
    use crate::rules::{SiteRule, model::RawRule};
    use proptest::prelude::*;
    use std::time::Duration;

    fn aggressive_rule() -> SiteRule {
        SiteRule::from(
            serde_json::from_value::<RawRule>(serde_json::json!({
                "block_regex": "{domain}/.+\\.js",
                "block_js_inline": ".*",
                "amp_unhide": 1,
                "amp_redirect": "amp",
                "cs_code": [{"cond": "div, p", "rm_attr": "style"}]
            }))
            .unwrap(),
        )
    }

    proptest! {
        #[test]
        fn test_extract_never_panics(
            html in ".*",
            url in "https://[a-z]+\\.com/[a-z/]*"
        ) {
            let url = Url::parse(&url).unwrap();
            let _ = ReadabilityExtractor.extract(&html, &url);
        }

        #[test]
        fn test_clean_html_never_panics(html in ".*") {
            let purifier = Purifier::new(HttpFetcher::new(Duration::from_secs(1)).unwrap());
            let url = Url::parse("https://example.com/a").unwrap();
            let rule = aggressive_rule();
            let cleaned = purifier.clean_html(&html, &url, &rule);
            let _ = purifier.amp_redirect_url(&cleaned, &url, &rule);
        }

        #[test]
        fn test_title_strip_never_panics(html in ".*", title in ".*") {
            let _ = strip_title_heading(&html, &title);
        }
    }
}
