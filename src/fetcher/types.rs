use encoding_rs::Encoding;
use reqwest::{StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize};
use url::Url;

/// Character set a page was decoded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charset {
    Utf8,
    Windows1252,
    ShiftJis,
    Gb2312,
    Big5,
    Other(String),
}

impl Charset {
    pub fn from_encoding(encoding: &'static Encoding) -> Self {
        match encoding {
            e if e == encoding_rs::UTF_8 => Self::Utf8,
            e if e == encoding_rs::WINDOWS_1252 => Self::Windows1252,
            e if e == encoding_rs::SHIFT_JIS => Self::ShiftJis,
            e if e == encoding_rs::GBK || e == encoding_rs::GB18030 => Self::Gb2312,
            e if e == encoding_rs::BIG5 => Self::Big5,
            other => Self::Other(other.name().to_string()),
        }
    }
}

/// A fetched HTML page, already decoded.
#[derive(Debug)]
pub struct PageResponse {
    /// Where redirects ended up; relative links resolve against this.
    pub url_final: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body_utf8: String,
    pub charset: Charset,
}
