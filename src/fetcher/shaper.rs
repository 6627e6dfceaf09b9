use rand::Rng;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use tracing::warn;
use url::Url;

use crate::rules::{CookiePolicy, IpRegion, RefererPolicy, SiteRule, UserAgentPolicy};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Address inside Google's published crawler range.
pub const GOOGLEBOT_IP: &str = "66.249.66.1";

/// An outgoing GET before it is handed to a client or a render context.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

impl OutgoingRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header_str(&self, name: impl reqwest::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Cookie names present on the request, in order.
    pub fn cookie_names(&self) -> Vec<String> {
        self.header_str(COOKIE)
            .map(|raw| parse_cookies(raw).map(|(name, _)| name.to_string()).collect())
            .unwrap_or_default()
    }
}

/// Apply a rule's header and cookie policy with thread-local randomness.
pub fn shape(request: &OutgoingRequest, rule: &SiteRule) -> OutgoingRequest {
    shape_with_rng(request, rule, &mut rand::thread_rng())
}

/// Apply a rule's header and cookie policy.
///
/// Order is fixed: user agent, referer, cookies, custom headers, spoofed
/// forwarded-for address. The only nondeterminism is the address drawn from
/// `rng` when the rule asks for a random IP.
pub fn shape_with_rng<R: Rng>(
    request: &OutgoingRequest,
    rule: &SiteRule,
    rng: &mut R,
) -> OutgoingRequest {
    let mut headers = request.headers.clone();

    let forced_referer = rule.user_agent == Some(UserAgentPolicy::Googlebot);
    if let Some(user_agent) = &rule.user_agent {
        set(&mut headers, USER_AGENT, user_agent.header_value());
        if forced_referer {
            set(&mut headers, REFERER, RefererPolicy::Google.header_value());
            set(&mut headers, X_FORWARDED_FOR, GOOGLEBOT_IP);
        }
    }

    if !forced_referer && let Some(referer) = &rule.referer {
        set(&mut headers, REFERER, referer.header_value());
    }

    apply_cookie_policy(&mut headers, &rule.cookies);

    for (name, value) in &rule.headers {
        set(&mut headers, name.as_str(), value);
    }

    if let Some(region) = rule.random_ip {
        let ip = random_ip(region, rng);
        set(&mut headers, X_FORWARDED_FOR, &ip);
    }

    OutgoingRequest {
        url: request.url.clone(),
        headers,
    }
}

fn apply_cookie_policy(headers: &mut HeaderMap, policy: &CookiePolicy) {
    let keep: Box<dyn Fn(&str) -> bool + '_> = match policy {
        CookiePolicy::Allow => return,
        CookiePolicy::Remove | CookiePolicy::Default => {
            headers.remove(COOKIE);
            return;
        }
        CookiePolicy::SelectDrop(names) => Box::new(|name| !names.iter().any(|n| n == name)),
        CookiePolicy::SelectHold(names) => Box::new(|name| names.iter().any(|n| n == name)),
    };

    let existing = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    if existing.is_empty() {
        return;
    }

    let filtered = parse_cookies(&existing)
        .filter(|&(name, _)| keep(name))
        .map(|(_, pair)| pair)
        .collect::<Vec<_>>()
        .join("; ");

    headers.remove(COOKIE);
    if !filtered.is_empty() {
        set(headers, COOKIE, &filtered);
    }
}

/// Yields `(name, "name=value")` for each cookie in a header value.
fn parse_cookies(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| (pair.split('=').next().unwrap_or(pair).trim(), pair))
}

fn random_ip<R: Rng>(region: IpRegion, rng: &mut R) -> String {
    match region {
        IpRegion::Eu => format!("185.185.{}.{}", rng.gen_range(0..=255), rng.gen_range(0..=255)),
        IpRegion::Any => format!(
            "{}.{}.{}.{}",
            rng.gen_range(1..=223),
            rng.gen_range(0..=255),
            rng.gen_range(0..=255),
            rng.gen_range(1..=254)
        ),
    }
}

fn set<K>(headers: &mut HeaderMap, name: K, value: &str)
where
    K: TryInto<HeaderName>,
    K::Error: std::fmt::Display,
{
    let name = match name.try_into() {
        Ok(name) => name,
        Err(e) => {
            warn!("Skipping invalid header name: {}", e);
            return;
        }
    };
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => warn!("Skipping invalid value for header {}: {}", name, e),
    }
}
