//! Chrome DevTools Protocol backend.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
    FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventRequestWillBeSent, Headers, ResourceType, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::storage::ClearCookiesParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::render::{ContextOptions, RenderContext, RenderEngine, RenderError};

fn engine_error(e: impl std::fmt::Display) -> RenderError {
    RenderError::Engine(e.to_string())
}

/// A launched headless Chrome. Each render gets its own browser context, so
/// cookies and storage never leak between concurrent renders.
pub struct ChromiumEngine {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumEngine {
    pub async fn launch() -> Result<Self, RenderError> {
        let config = BrowserConfig::builder()
            .args(vec![
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--blink-settings=imagesEnabled=false",
            ])
            .build()
            .map_err(engine_error)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(engine_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            handler,
        })
    }
}

impl Drop for ChromiumEngine {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

async fn dispose_context(browser: &Browser, id: BrowserContextId) {
    if let Err(e) = browser.execute(DisposeBrowserContextParams::new(id)).await {
        warn!("Disposing browser context failed: {}", e);
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn open(&self, options: ContextOptions) -> Result<Box<dyn RenderContext>, RenderError> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(engine_error)?
            .result
            .browser_context_id;

        match self.prepare(context_id.clone(), options).await {
            Ok((page, navigations, interceptor)) => Ok(Box::new(ChromiumContext {
                browser: self.browser.clone(),
                context_id: Some(context_id),
                page: Some(page),
                navigations,
                interceptor,
            })),
            Err(e) => {
                dispose_context(&self.browser, context_id).await;
                Err(e)
            }
        }
    }
}

impl ChromiumEngine {
    async fn prepare(
        &self,
        context_id: BrowserContextId,
        options: ContextOptions,
    ) -> Result<(Page, EventStream<EventRequestWillBeSent>, JoinHandle<()>), RenderError> {
        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(engine_error)?;
        let page = self.browser.new_page(target).await.map_err(engine_error)?;

        page.set_user_agent(options.user_agent.as_str())
            .await
            .map_err(engine_error)?;

        if !options.headers.is_empty() {
            let headers: serde_json::Map<String, serde_json::Value> = options
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
                .collect();
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(headers),
            )))
            .await
            .map_err(engine_error)?;
        }

        if options.clear_cookies {
            page.execute(ClearCookiesParams {
                browser_context_id: Some(context_id),
            })
            .await
            .map_err(engine_error)?;
        }

        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(engine_error)?;
        let navigations = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(engine_error)?;
        page.execute(FetchEnableParams::default())
            .await
            .map_err(engine_error)?;

        let filter = options.filter;
        let interceptor_page = page.clone();
        let interceptor = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let request_id = event.request_id.clone();
                let result = if filter.should_block(&event.request.url) {
                    debug!("Blocked {}", event.request.url);
                    interceptor_page
                        .execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient))
                        .await
                        .map(|_| ())
                } else {
                    interceptor_page
                        .execute(ContinueRequestParams::new(request_id))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = result {
                    debug!("Interception reply failed: {}", e);
                }
            }
        });

        Ok((page, navigations, interceptor))
    }
}

struct ChromiumContext {
    browser: Arc<Browser>,
    context_id: Option<BrowserContextId>,
    page: Option<Page>,
    navigations: EventStream<EventRequestWillBeSent>,
    interceptor: JoinHandle<()>,
}

impl ChromiumContext {
    fn page(&self) -> Result<&Page, RenderError> {
        self.page
            .as_ref()
            .ok_or_else(|| RenderError::Engine("context already closed".to_string()))
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &Url) -> Result<(), RenderError> {
        self.page()?
            .execute(NavigateParams::new(url.as_str()))
            .await
            .map_err(engine_error)?;
        Ok(())
    }

    async fn wait_for_load(&mut self) -> Result<(), RenderError> {
        self.page()?
            .wait_for_navigation()
            .await
            .map_err(engine_error)?;
        Ok(())
    }

    async fn next_navigation(&mut self) -> Result<Option<Url>, RenderError> {
        while let Some(event) = self.navigations.next().await {
            let event: Arc<EventRequestWillBeSent> = event;
            if event.r#type != Some(ResourceType::Document) {
                continue;
            }
            match Url::parse(&event.request.url) {
                Ok(url) => return Ok(Some(url)),
                Err(e) => debug!("Skipping unparseable navigation {}: {}", event.request.url, e),
            }
        }
        Ok(None)
    }

    async fn evaluate(&mut self, script: &str) -> Result<(), RenderError> {
        self.page()?.evaluate(script).await.map_err(engine_error)?;
        Ok(())
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        self.page()?.content().await.map_err(engine_error)
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.interceptor.abort();
        let closed = match self.page.take() {
            Some(page) => page.close().await.map_err(|e| {
                warn!("Page close failed: {}", e);
                engine_error(e)
            }),
            None => Ok(()),
        };
        if let Some(id) = self.context_id.take() {
            dispose_context(&self.browser, id).await;
        }
        closed
    }
}
