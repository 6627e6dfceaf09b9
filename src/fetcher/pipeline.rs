use crate::fetcher::{
    errors::FetchError,
    types::{Charset, PageResponse},
};
use bytes::Bytes;
use encoding_rs::Encoding;
use regex::Regex;
use reqwest::{StatusCode, header::HeaderMap};
use std::sync::LazyLock;
use url::Url;

static CHARSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?([^"'\s;]+)"#).unwrap());

static META_CHARSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<meta\s+[^>]*?charset\s*=\s*["']?([^"'\s/>]+)"#).unwrap());

static META_HTTP_EQUIV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+[^>]*?http-equiv\s*=\s*["']?content-type["']?[^>]*?content\s*=\s*["']?[^"'>]*?charset\s*=\s*([^"'\s;/>]+)"#).unwrap()
});

const SNIFF_WINDOW: usize = 4096;

pub fn process_response(
    url_final: Url,
    status: StatusCode,
    headers: HeaderMap,
    body_bytes: Bytes,
    content_type: &str,
) -> Result<PageResponse, FetchError> {
    let encoding = detect_encoding(content_type, &body_bytes);
    let (decoded, _, _) = encoding.decode(&body_bytes);

    Ok(PageResponse {
        url_final,
        status,
        headers,
        body_utf8: decoded.into_owned(),
        charset: Charset::from_encoding(encoding),
    })
}

/// Response header charset, then a `<meta>` declaration in the first 4KB,
/// then UTF-8. Bodies that are not valid UTF-8 and declare nothing are
/// sniffed instead of being decoded into replacement characters.
pub fn detect_encoding(content_type: &str, body_bytes: &[u8]) -> &'static Encoding {
    if let Some(encoding) = label_from(&CHARSET_REGEX, content_type) {
        return encoding;
    }

    let search_bytes = &body_bytes[..body_bytes.len().min(SNIFF_WINDOW)];
    let search_str = String::from_utf8_lossy(search_bytes);

    if let Some(encoding) = label_from(&META_CHARSET_REGEX, &search_str)
        .or_else(|| label_from(&META_HTTP_EQUIV_REGEX, &search_str))
    {
        return encoding;
    }

    if std::str::from_utf8(body_bytes).is_ok() {
        return encoding_rs::UTF_8;
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(search_bytes, false);
    detector.guess(None, true)
}

fn label_from(regex: &Regex, haystack: &str) -> Option<&'static Encoding> {
    let label = regex.captures(haystack)?.get(1)?.as_str().to_lowercase();
    Encoding::for_label(label.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_charset_wins() {
        let body = b"<html><head><meta charset=\"iso-8859-1\"></head></html>";
        let encoding = detect_encoding("text/html; charset=utf-8", body);
        assert_eq!(encoding, encoding_rs::UTF_8);
    }

    #[test]
    fn test_detect_charset_from_meta_tag() {
        let body = b"<html><head><meta charset=\"iso-8859-1\"><title>Test</title></head></html>";
        // ISO-8859-1 is an alias of windows-1252 in the Encoding Standard
        let encoding = detect_encoding("text/html", body);
        assert_eq!(
            Charset::from_encoding(encoding),
            Charset::Windows1252
        );
    }

    #[test]
    fn test_detect_charset_from_meta_http_equiv() {
        let body = b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=shift_jis\"></head></html>";
        assert_eq!(detect_encoding("text/html", body), encoding_rs::SHIFT_JIS);
    }

    #[test]
    fn test_undeclared_defaults_to_utf8() {
        let body = "<p>Grüße, 世界</p>".as_bytes();
        assert_eq!(detect_encoding("text/html", body), encoding_rs::UTF_8);
    }

    #[test]
    fn test_process_response_decodes_latin1() {
        let body = Bytes::from_static(b"<p>caf\xe9</p>");
        let page = process_response(
            Url::parse("https://example.com/").unwrap(),
            StatusCode::OK,
            HeaderMap::new(),
            body,
            "text/html; charset=iso-8859-1",
        )
        .unwrap();
        assert_eq!(page.body_utf8, "<p>café</p>");
    }
}
