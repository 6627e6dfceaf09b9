use regex::Regex;
use tracing::warn;
use url::Url;

use crate::purifier::scripts::domain_pattern;
use crate::rules::{SiteRule, host_of};

const MEDIA_EXTENSIONS: [&str; 8] = [
    ".jpg", ".png", ".gif", ".webp", ".mp4", ".mp3", ".woff", ".woff2",
];

/// Network-layer block list for a render context.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    block_media: bool,
    block_stylesheets: bool,
    pattern: Option<Regex>,
    site_host: Option<String>,
    block_site_scripts: bool,
    block_external_scripts: bool,
}

impl RequestFilter {
    /// Media and fonts, plus the rule's script blocking.
    pub fn for_rule(page: &Url, rule: Option<&SiteRule>) -> Self {
        let mut filter = Self {
            block_media: true,
            site_host: host_of(page.as_str()),
            ..Self::default()
        };

        let Some(rule) = rule else {
            return filter;
        };

        if let Some(pattern) = &rule.block_regex {
            match domain_pattern(pattern, page) {
                Ok(regex) => filter.pattern = Some(regex),
                Err(e) => warn!("Render filter ignoring block_regex {:?}: {}", pattern, e),
            }
        }
        filter.block_site_scripts = rule.block_js;
        filter.block_external_scripts = rule.block_js_ext;
        filter
    }

    /// Redirect resolution never needs rendering, so styles go too.
    pub fn for_redirect() -> Self {
        Self {
            block_media: true,
            block_stylesheets: true,
            ..Self::default()
        }
    }

    pub fn should_block(&self, request_url: &str) -> bool {
        let lowered = request_url.to_lowercase();
        let path = lowered.split(['?', '#']).next().unwrap_or_default();

        if self.block_media && MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return true;
        }
        if self.block_stylesheets && path.ends_with(".css") {
            return true;
        }
        if self.pattern.as_ref().is_some_and(|re| re.is_match(request_url)) {
            return true;
        }

        if path.ends_with(".js") && (self.block_site_scripts || self.block_external_scripts) {
            let same_site = match (&self.site_host, host_of(request_url)) {
                (Some(site), Some(host)) => host == *site || host.ends_with(&format!(".{site}")),
                _ => false,
            };
            return if same_site {
                self.block_site_scripts
            } else {
                self.block_external_scripts
            };
        }

        false
    }
}
