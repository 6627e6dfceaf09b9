use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const UA_GOOGLEBOT: &str =
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
pub const UA_BINGBOT: &str =
    "Mozilla/5.0 (compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm)";
pub const UA_FACEBOOKBOT: &str =
    "facebookexternalhit/1.1 (+http://www.facebook.com/externalhit_uatext.php)";

/// Marker prefix for grouped catalog entries.
pub const GROUP_MARKER: &str = "###";
/// Prefix used by catalog entries that carry extension settings, not sites.
pub const OPTIONS_PREFIX: &str = "#options_";

/// A catalog entry exactly as it appears on the wire.
///
/// Numeric flags are accepted as numbers, booleans or numeric strings because
/// the catalogs in the wild are not consistent about it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRule {
    pub domain: Option<String>,
    pub group: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient_flag")]
    pub allow_cookies: Option<i64>,
    #[serde(deserialize_with = "lenient_flag")]
    pub remove_cookies: Option<i64>,
    pub remove_cookies_select_hold: Option<Vec<String>>,
    pub remove_cookies_select_drop: Option<Vec<String>>,
    pub useragent: Option<String>,
    pub useragent_custom: Option<String>,
    pub referer: Option<String>,
    pub referer_custom: Option<String>,
    pub random_ip: Option<String>,
    pub block_regex: Option<String>,
    #[serde(deserialize_with = "lenient_flag")]
    pub block_js: Option<i64>,
    #[serde(deserialize_with = "lenient_flag")]
    pub block_js_ext: Option<i64>,
    pub block_js_inline: Option<String>,
    pub ld_json: Option<String>,
    pub ld_json_next: Option<String>,
    pub ld_json_source: Option<String>,
    pub ld_json_url: Option<String>,
    pub ld_archive_is: Option<String>,
    pub ld_och_to_unlock: Option<String>,
    #[serde(deserialize_with = "lenient_flag")]
    pub cs_clear_lclstrg: Option<i64>,
    pub cs_code: Option<Value>,
    #[serde(deserialize_with = "lenient_flag")]
    pub cs_dompurify: Option<i64>,
    #[serde(deserialize_with = "lenient_flag")]
    pub cs_block: Option<i64>,
    #[serde(deserialize_with = "lenient_flag")]
    pub amp_unhide: Option<i64>,
    pub amp_redirect: Option<String>,
    pub add_ext_link: Option<String>,
    pub add_ext_link_type: Option<String>,
    pub exception: Option<Vec<RawRule>>,
    #[serde(deserialize_with = "lenient_flag")]
    pub nofix: Option<i64>,
    pub headers_custom: Option<BTreeMap<String, String>>,
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::Bool(b)) => Some(i64::from(b)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgentPolicy {
    Googlebot,
    Bingbot,
    Facebookbot,
    Custom(String),
}

impl UserAgentPolicy {
    pub fn header_value(&self) -> &str {
        match self {
            Self::Googlebot => UA_GOOGLEBOT,
            Self::Bingbot => UA_BINGBOT,
            Self::Facebookbot => UA_FACEBOOKBOT,
            Self::Custom(ua) => ua,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefererPolicy {
    Google,
    Facebook,
    Twitter,
    Custom(String),
}

impl RefererPolicy {
    pub fn header_value(&self) -> &str {
        match self {
            Self::Google => "https://www.google.com/",
            Self::Facebook => "https://www.facebook.com/",
            Self::Twitter => "https://t.co/",
            Self::Custom(referer) => referer,
        }
    }
}

/// Cookie handling, already resolved to the variant that wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookiePolicy {
    /// Keep everything except the named cookies.
    SelectDrop(Vec<String>),
    /// Keep only the named cookies.
    SelectHold(Vec<String>),
    Allow,
    Remove,
    /// No explicit policy; cookies are cleared.
    Default,
}

impl CookiePolicy {
    pub fn clears_all(&self) -> bool {
        matches!(self, Self::Remove | Self::Default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRegion {
    Eu,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomAction {
    RemoveElement,
    RemoveAttribute(String),
    SetAttribute { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomOperation {
    pub selector: String,
    pub action: DomAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredData {
    pub ld_json: Option<String>,
    pub ld_json_next: Option<String>,
    pub ld_json_source: Option<String>,
    pub ld_json_url: Option<String>,
    pub ld_archive_is: Option<String>,
    pub ld_och_to_unlock: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    pub url: String,
    pub kind: Option<String>,
}

/// Typed per-site policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRule {
    pub domain: Option<String>,
    pub group: Vec<String>,
    pub exceptions: Vec<SiteRule>,
    pub cookies: CookiePolicy,
    pub user_agent: Option<UserAgentPolicy>,
    pub referer: Option<RefererPolicy>,
    pub random_ip: Option<IpRegion>,
    pub block_regex: Option<String>,
    pub block_js: bool,
    pub block_js_ext: bool,
    pub block_js_inline: Option<String>,
    pub structured: StructuredData,
    pub clear_local_storage: bool,
    pub dom_ops: Vec<DomOperation>,
    pub dom_purify: bool,
    pub cs_block: bool,
    pub amp_unhide: bool,
    pub amp_redirect: Option<String>,
    pub ext_link: Option<ExternalLink>,
    pub disabled: bool,
    pub headers: BTreeMap<String, String>,
}

impl SiteRule {
    pub fn is_group(&self) -> bool {
        self.domain
            .as_deref()
            .is_some_and(|d| d.starts_with(GROUP_MARKER))
            && !self.group.is_empty()
    }

    /// Entries that configure the catalog itself rather than a site.
    pub fn is_setting(&self) -> bool {
        self.domain
            .as_deref()
            .is_some_and(|d| d == GROUP_MARKER || d.starts_with(OPTIONS_PREFIX))
    }

    /// First exception naming `domain`, either directly or through its group.
    pub fn exception_for(&self, domain: &str) -> Option<&SiteRule> {
        self.exceptions.iter().find(|exception| {
            exception.domain.as_deref() == Some(domain)
                || exception.group.iter().any(|member| member == domain)
        })
    }
}

impl From<RawRule> for SiteRule {
    fn from(raw: RawRule) -> Self {
        let cookies = match (
            raw.remove_cookies_select_drop,
            raw.remove_cookies_select_hold,
        ) {
            (Some(drop), _) => CookiePolicy::SelectDrop(drop),
            (None, Some(hold)) => CookiePolicy::SelectHold(hold),
            (None, None) if flag(raw.allow_cookies) => CookiePolicy::Allow,
            (None, None) if flag(raw.remove_cookies) => CookiePolicy::Remove,
            (None, None) => CookiePolicy::Default,
        };

        let user_agent = match non_empty(raw.useragent).as_deref() {
            Some("googlebot") => Some(UserAgentPolicy::Googlebot),
            Some("bingbot") => Some(UserAgentPolicy::Bingbot),
            Some("facebookbot") => Some(UserAgentPolicy::Facebookbot),
            _ => non_empty(raw.useragent_custom).map(UserAgentPolicy::Custom),
        };

        let referer = match non_empty(raw.referer).as_deref() {
            Some("google") => Some(RefererPolicy::Google),
            Some("facebook") => Some(RefererPolicy::Facebook),
            Some("twitter") => Some(RefererPolicy::Twitter),
            _ => non_empty(raw.referer_custom).map(RefererPolicy::Custom),
        };

        let random_ip = non_empty(raw.random_ip).map(|region| match region.as_str() {
            "eu" => IpRegion::Eu,
            _ => IpRegion::Any,
        });

        let ext_link = non_empty(raw.add_ext_link).map(|url| ExternalLink {
            url,
            kind: non_empty(raw.add_ext_link_type),
        });

        Self {
            domain: non_empty(raw.domain),
            group: raw.group.unwrap_or_default(),
            exceptions: raw
                .exception
                .unwrap_or_default()
                .into_iter()
                .map(SiteRule::from)
                .collect(),
            cookies,
            user_agent,
            referer,
            random_ip,
            block_regex: non_empty(raw.block_regex),
            block_js: flag(raw.block_js),
            block_js_ext: flag(raw.block_js_ext),
            block_js_inline: non_empty(raw.block_js_inline),
            structured: StructuredData {
                ld_json: non_empty(raw.ld_json),
                ld_json_next: non_empty(raw.ld_json_next),
                ld_json_source: non_empty(raw.ld_json_source),
                ld_json_url: non_empty(raw.ld_json_url),
                ld_archive_is: non_empty(raw.ld_archive_is),
                ld_och_to_unlock: non_empty(raw.ld_och_to_unlock),
            },
            clear_local_storage: flag(raw.cs_clear_lclstrg),
            dom_ops: raw.cs_code.as_ref().map(parse_dom_ops).unwrap_or_default(),
            dom_purify: flag(raw.cs_dompurify),
            cs_block: flag(raw.cs_block),
            amp_unhide: flag(raw.amp_unhide),
            amp_redirect: non_empty(raw.amp_redirect),
            ext_link,
            disabled: flag(raw.nofix),
            headers: raw.headers_custom.unwrap_or_default(),
        }
    }
}

fn flag(value: Option<i64>) -> bool {
    value.is_some_and(|v| v > 0)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Expand `cs_code` (one object or an array of them) into ordered operations.
///
/// Items without a `cond` selector are skipped.
fn parse_dom_ops(code: &Value) -> Vec<DomOperation> {
    let items: Vec<&Value> = match code {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![code],
        _ => return Vec::new(),
    };

    let mut ops = Vec::new();
    for item in items {
        let Some(selector) = item.get("cond").and_then(Value::as_str) else {
            continue;
        };

        if item.get("rm_elem").is_some_and(is_truthy) {
            ops.push(DomOperation {
                selector: selector.to_string(),
                action: DomAction::RemoveElement,
            });
        }
        if let Some(attr) = item.get("rm_attr").and_then(Value::as_str) {
            ops.push(DomOperation {
                selector: selector.to_string(),
                action: DomAction::RemoveAttribute(attr.to_string()),
            });
        }
        if let Some(attr) = item.get("set_attr").and_then(Value::as_str) {
            let value = item
                .get("set_val")
                .and_then(Value::as_str)
                .unwrap_or_default();
            ops.push(DomOperation {
                selector: selector.to_string(),
                action: DomAction::SetAttribute {
                    name: attr.to_string(),
                    value: value.to_string(),
                },
            });
        }
    }
    ops
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_i64() == Some(1),
        Value::Bool(b) => *b,
        Value::String(s) => s == "1",
        _ => false,
    }
}
