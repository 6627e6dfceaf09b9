use tracing::instrument;
use url::Url;

use crate::dom;
use crate::fetcher::{FetchError, HttpFetcher, OutgoingRequest};

/// Mirror toolbar, donation banner and footer.
const MIRROR_CHROME: &str = "#HEADER, #wm-ipp, .wm-ipp-base, #donato, #FOOTER";

/// `<mirror>/newest/<original-url>`
pub fn archive_url(mirror: &str, original: &Url) -> Result<Url, FetchError> {
    let base = mirror.trim_end_matches('/');
    Ok(Url::parse(&format!("{base}/newest/{original}"))?)
}

pub fn strip_mirror_chrome(html: &str) -> String {
    let document = dom::parse(html);
    dom::remove_all(&document, MIRROR_CHROME);
    dom::body_inner_html(&document)
}

/// Latest snapshot of `original`, with the mirror's own UI removed.
#[instrument(skip(fetcher))]
pub async fn fetch_snapshot(
    fetcher: &HttpFetcher,
    mirror: &str,
    original: &Url,
) -> Result<String, FetchError> {
    let request = OutgoingRequest::get(archive_url(mirror, original)?);
    let page = fetcher.fetch_page(&request).await?;
    Ok(strip_mirror_chrome(&page.body_utf8))
}
