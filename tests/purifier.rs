use feedbypass::fetcher::HttpFetcher;
use feedbypass::purifier::Purifier;
use feedbypass::rules::{SiteRule, model::RawRule, model::UA_GOOGLEBOT};
use serde_json::json;
use std::time::Duration;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

fn purifier() -> Purifier {
    Purifier::new(HttpFetcher::new(Duration::from_secs(5)).unwrap())
}

fn rule(value: serde_json::Value) -> SiteRule {
    SiteRule::from(serde_json::from_value::<RawRule>(value).unwrap())
}

fn page_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/2024/05/story/", server.uri())).unwrap()
}

const PAGE_WITH_JSON_LINK: &str = r#"<html><head>
    <link rel="alternate" type="application/json" href="/wp-json/wp/v2/posts/42">
    </head><body><p>Subscribe to continue reading</p></body></html>"#;

#[tokio::test]
async fn test_json_api_link_rendered_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/42"))
        .and(header("user-agent", UA_GOOGLEBOT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "content": {"rendered": "<p>The whole story.</p>", "protected": false}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fragment = purifier()
        .purify(
            PAGE_WITH_JSON_LINK,
            &page_url(&server),
            &rule(json!({"ld_json_url": "1"})),
        )
        .await;

    assert_eq!(fragment.as_deref(), Some("<div><p>The whole story.</p></div>"));
}

#[tokio::test]
async fn test_json_api_link_not_followed_without_directive() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "x"})))
        .expect(0)
        .mount(&server)
        .await;

    let fragment = purifier()
        .purify(PAGE_WITH_JSON_LINK, &page_url(&server), &rule(json!({})))
        .await;

    assert_eq!(fragment, None);
}

#[tokio::test]
async fn test_source_script_article_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/story-json/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "articleBody": "First line.\nSecond <line>."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = r#"<html><body><p>Teaser</p>
        <script src="/static/app.js"></script>
        <script src="/story-json/7"></script></body></html>"#;
    let fragment = purifier()
        .purify(
            page,
            &page_url(&server),
            &rule(json!({"ld_json_source": "/story-json/"})),
        )
        .await;

    assert_eq!(
        fragment.as_deref(),
        Some("<div><p>First line.</p><p>Second &lt;line&gt;.</p></div>")
    );
}

#[tokio::test]
async fn test_failed_json_link_falls_through_to_source_script() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/42"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/article.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "Recovered body"})))
        .expect(1)
        .mount(&server)
        .await;

    let page = r#"<html><head>
        <link rel="alternate" type="application/json" href="/wp-json/wp/v2/posts/42">
        </head><body><script src="/data/article.json"></script></body></html>"#;
    let fragment = purifier()
        .purify(
            page,
            &page_url(&server),
            &rule(json!({"ld_json_url": "1", "ld_json_source": "/story-json/"})),
        )
        .await;

    assert_eq!(fragment.as_deref(), Some("<div><p>Recovered body</p></div>"));
}

#[tokio::test]
async fn test_every_remote_strategy_failing_yields_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let page = r#"<html><head>
        <link rel="alternate" type="application/json" href="/wp-json/wp/v2/posts/42">
        </head><body><script src="/story-json/7"></script></body></html>"#;
    let fragment = purifier()
        .purify(
            page,
            &page_url(&server),
            &rule(json!({"ld_json_url": "1", "ld_json_source": "/story-json/"})),
        )
        .await;

    assert_eq!(fragment, None);
}
