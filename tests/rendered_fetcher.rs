mod support;

use feedbypass::render::{RenderError, RenderSettings, RenderedFetcher};
use feedbypass::rules::{SiteRule, model::RawRule, model::UA_GOOGLEBOT};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{FakeEngine, eventually};
use url::Url;

fn settings() -> RenderSettings {
    RenderSettings {
        settle_delay: Duration::from_millis(10),
        ..RenderSettings::default()
    }
}

fn rule(value: serde_json::Value) -> SiteRule {
    SiteRule::from(serde_json::from_value::<RawRule>(value).unwrap())
}

#[tokio::test]
async fn test_rendered_content_closes_context_once() {
    let engine = FakeEngine::serving("<html><body><article>Rendered</article></body></html>");
    let counters = engine.counters.clone();
    let fetcher = RenderedFetcher::new(Arc::new(engine), settings());
    let url = Url::parse("https://www.example.com/story").unwrap();
    let rule = rule(json!({"domain": "example.com", "useragent": "googlebot", "cs_clear_lclstrg": 1}));

    let html = fetcher
        .fetch_rendered(&url, Some(&rule), Duration::from_secs(2))
        .await
        .unwrap();

    assert!(html.contains("Rendered"));
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(counters.user_agents.lock().unwrap().as_slice(), [UA_GOOGLEBOT]);

    let scripts = counters.scripts.lock().unwrap();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].contains("localStorage"));
}

#[tokio::test]
async fn test_timeout_closes_context_once() {
    let engine = FakeEngine::hanging();
    let counters = engine.counters.clone();
    let fetcher = RenderedFetcher::new(Arc::new(engine), settings());
    let url = Url::parse("https://www.example.com/story").unwrap();

    let result = fetcher
        .fetch_rendered(&url, None, Duration::from_millis(50))
        .await;

    assert_eq!(result, Err(RenderError::Timeout(Duration::from_millis(50))));
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn test_dropped_caller_still_closes_context() {
    let engine = FakeEngine::hanging();
    let counters = engine.counters.clone();
    let fetcher = RenderedFetcher::new(Arc::new(engine), settings());

    let caller = tokio::spawn({
        let fetcher = fetcher.clone();
        async move {
            let url = Url::parse("https://www.example.com/story").unwrap();
            fetcher
                .fetch_rendered(&url, None, Duration::from_secs(30))
                .await
        }
    });

    assert!(eventually(|| counters.opens() == 1).await);
    caller.abort();

    assert!(eventually(|| counters.closes() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn test_contexts_are_bounded() {
    let engine = FakeEngine::hanging();
    let counters = engine.counters.clone();
    let fetcher = RenderedFetcher::new(
        Arc::new(engine),
        RenderSettings {
            max_contexts: 1,
            ..settings()
        },
    );

    let first = tokio::spawn({
        let fetcher = fetcher.clone();
        async move {
            let url = Url::parse("https://a.example.com/").unwrap();
            fetcher.fetch_rendered(&url, None, Duration::from_millis(200)).await
        }
    });
    assert!(eventually(|| counters.opens() == 1).await);

    let second = tokio::spawn({
        let fetcher = fetcher.clone();
        async move {
            let url = Url::parse("https://b.example.com/").unwrap();
            fetcher.fetch_rendered(&url, None, Duration::from_secs(1)).await
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counters.opens(), 1);

    assert!(first.await.unwrap().is_err());
    assert!(second.await.unwrap().is_err());
    assert_eq!(counters.opens(), 2);
    assert_eq!(counters.closes(), 2);
}

#[tokio::test]
async fn test_waiting_for_a_context_counts_against_the_timeout() {
    let engine = FakeEngine::hanging();
    let counters = engine.counters.clone();
    let fetcher = RenderedFetcher::new(
        Arc::new(engine),
        RenderSettings {
            max_contexts: 1,
            ..settings()
        },
    );

    let holder = tokio::spawn({
        let fetcher = fetcher.clone();
        async move {
            let url = Url::parse("https://a.example.com/").unwrap();
            fetcher.fetch_rendered(&url, None, Duration::from_millis(1500)).await
        }
    });
    assert!(eventually(|| counters.opens() == 1).await);

    let url = Url::parse("https://b.example.com/").unwrap();
    let started = Instant::now();
    let result = fetcher
        .fetch_rendered(&url, None, Duration::from_millis(100))
        .await;

    assert_eq!(result, Err(RenderError::Timeout(Duration::from_millis(100))));
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(counters.opens(), 1);

    holder.abort();
    assert!(eventually(|| counters.closes() == 1).await);
}

#[tokio::test]
async fn test_slow_open_and_load_share_one_deadline() {
    let engine = FakeEngine::serving("<html><body><article>Late</article></body></html>")
        .with_delays(Duration::from_millis(300), Duration::from_millis(300));
    let counters = engine.counters.clone();
    let fetcher = RenderedFetcher::new(Arc::new(engine), settings());
    let url = Url::parse("https://www.example.com/story").unwrap();

    let started = Instant::now();
    let result = fetcher
        .fetch_rendered(&url, None, Duration::from_millis(500))
        .await;

    assert_eq!(result, Err(RenderError::Timeout(Duration::from_millis(500))));
    assert!(started.elapsed() < Duration::from_millis(750));
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn test_resolve_redirect_leaves_wrapper_site() {
    let engine = FakeEngine::redirecting(&[
        "https://news.google.com/articles/abc?hl=en",
        "https://consent.google.com/ml?continue=x",
        "https://www.theguardian.com/world/2024/story",
    ]);
    let counters = engine.counters.clone();
    let fetcher = RenderedFetcher::new(Arc::new(engine), settings());
    let url = Url::parse("https://news.google.com/rss/articles/abc").unwrap();

    let resolved = fetcher.resolve_redirect(&url, Duration::from_secs(2)).await;

    assert_eq!(
        resolved.as_ref().map(Url::as_str),
        Some("https://www.theguardian.com/world/2024/story")
    );
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn test_resolve_redirect_dead_end() {
    let engine = FakeEngine::redirecting(&["https://news.google.com/articles/abc"]);
    let counters = engine.counters.clone();
    let fetcher = RenderedFetcher::new(Arc::new(engine), settings());
    let url = Url::parse("https://news.google.com/rss/articles/abc").unwrap();

    assert_eq!(fetcher.resolve_redirect(&url, Duration::from_secs(2)).await, None);
    assert_eq!(counters.closes(), 1);
}
