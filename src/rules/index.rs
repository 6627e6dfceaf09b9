use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use url::Url;

use crate::rules::{catalog::RuleSet, model::SiteRule};

/// Immutable domain → effective rule table.
///
/// Built in one pass from a [`RuleSet`]; never mutated after construction, so
/// it can be shared behind an `Arc` and swapped wholesale on reload.
#[derive(Debug, Default)]
pub struct DomainIndex {
    domains: HashMap<String, Arc<SiteRule>>,
    named: Vec<(String, Arc<SiteRule>)>,
}

impl DomainIndex {
    pub fn build(rules: &RuleSet) -> Self {
        let mut domains = HashMap::new();
        let mut named = Vec::new();

        for (key, rule) in rules.iter() {
            if rule.is_setting() || rule.disabled {
                continue;
            }
            let shared = Arc::new(rule.clone());
            named.push((key.clone(), shared.clone()));

            if rule.is_group() {
                for member in &rule.group {
                    let effective = match rule.exception_for(member) {
                        Some(exception) if !exception.disabled => Arc::new(exception.clone()),
                        Some(_) => continue,
                        None => shared.clone(),
                    };
                    domains.insert(member.clone(), effective);
                }
            } else if let Some(domain) = rule.domain.as_deref() {
                domains.insert(domain.to_string(), shared);
            }
        }

        Self { domains, named }
    }

    /// Resolve the rule for a URL.
    ///
    /// Exact host match first, then the longest registered domain the host is
    /// a subdomain of. Walking the host's label suffixes makes that a handful of
    /// hash lookups instead of a scan over every domain.
    pub fn resolve(&self, url: &str) -> Option<Arc<SiteRule>> {
        let host = host_of(url)?;

        if let Some(rule) = self.domains.get(&host) {
            return Some(rule.clone());
        }

        let mut rest = host.as_str();
        while let Some(pos) = rest.find('.') {
            rest = &rest[pos + 1..];
            if rest.is_empty() {
                break;
            }
            if let Some(rule) = self.domains.get(rest) {
                return Some(rule.clone());
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn domains(&self) -> BTreeSet<String> {
        self.domains.keys().cloned().collect()
    }

    /// (rule name, domain) pairs for every enabled site, groups expanded.
    pub fn sites(&self) -> Vec<(String, String)> {
        let mut sites = Vec::new();
        for (name, rule) in &self.named {
            if rule.is_group() {
                sites.extend(
                    rule.group
                        .iter()
                        .filter(|member| !rule.exception_for(member).is_some_and(|e| e.disabled))
                        .map(|d| (name.clone(), d.clone())),
                );
            } else if let Some(domain) = rule.domain.as_deref()
                && !domain.starts_with('#')
            {
                sites.push((name.clone(), domain.to_string()));
            }
        }
        sites
    }
}

/// Lower-cased host with a leading `www.` removed, or `None` when the URL
/// does not parse or has no host.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(host.as_str()).to_string();
    (!host.is_empty()).then_some(host)
}
