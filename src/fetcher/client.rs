use crate::fetcher::{
    errors::FetchError,
    pipeline::process_response,
    shaper::OutgoingRequest,
    types::PageResponse,
};
use bytes::Bytes;
use reqwest::{Client, ClientBuilder, Response, header};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const MAX_BODY_SIZE: u64 = 5 * 1024 * 1024; // 5MB

/// Browser-like default, replaced per request by the rule's user agent.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<Client, FetchError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-US,en;q=0.9"),
    );

    ClientBuilder::new()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .user_agent(BROWSER_USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10))
        .default_headers(headers)
        .build()
        .map_err(|e| FetchError::Unknown(e.to_string()))
}

/// Pooled HTTP client shared by every fetch path.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(Duration::from_secs(10), timeout)?,
        })
    }

    /// GET an HTML page with the request's (already shaped) headers.
    #[instrument(skip_all, fields(url = %request.url))]
    pub async fn fetch_page(&self, request: &OutgoingRequest) -> Result<PageResponse, FetchError> {
        let response = self
            .client
            .get(request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        let final_url = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        let body_bytes = read_body(response).await?;

        if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
            return Err(FetchError::UnsupportedContentType(content_type));
        }

        process_response(final_url, status, headers, body_bytes, &content_type)
    }

    /// GET a JSON document, sent with the given user agent.
    #[instrument(skip(self))]
    pub async fn fetch_json(
        &self,
        url: &Url,
        user_agent: &str,
    ) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(header::USER_AGENT, user_agent)
            .header(header::ACCEPT, "application/json, */*;q=0.5")
            .send()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        let body = read_body(response).await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// GET a text body regardless of content type.
    #[instrument(skip(self))]
    pub async fn fetch_text(&self, url: &Url, user_agent: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        let body = read_body(response).await?;
        String::from_utf8(body.to_vec()).map_err(|e| FetchError::Charset(e.to_string()))
    }
}

/// Status check plus body-size limits, shared by every fetch.
async fn read_body(response: Response) -> Result<Bytes, FetchError> {
    let status = response.status();
    if !status.is_success() {
        debug!("Request to {} returned {}", response.url(), status);
        return Err(FetchError::Http {
            status,
            retriable: status.is_server_error(),
        });
    }

    // Check content length before downloading
    if let Some(content_length) = response.content_length()
        && content_length > MAX_BODY_SIZE
    {
        return Err(FetchError::BodyTooLarge(content_length));
    }

    let body_bytes = response
        .bytes()
        .await
        .map_err(|e| FetchError::Io(e.to_string()))?;

    // Check body size after download (in case Content-Length was missing)
    if body_bytes.len() as u64 > MAX_BODY_SIZE {
        return Err(FetchError::BodyTooLarge(body_bytes.len() as u64));
    }

    Ok(body_bytes)
}
