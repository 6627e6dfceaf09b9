use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::rules::{
    errors::RuleError,
    model::{RawRule, SiteRule},
};

pub type CatalogDocument = Map<String, Value>;

/// Merged rule catalog keyed by rule name.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<String, SiteRule>,
}

impl RuleSet {
    pub fn get(&self, key: &str) -> Option<&SiteRule> {
        self.rules.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SiteRule)> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parse a catalog document. Only the top-level shape is validated here;
/// individual entries are checked during [`merge`].
pub fn parse_catalog(bytes: &[u8], source_name: &'static str) -> Result<CatalogDocument, RuleError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RuleError::MalformedCatalog {
            source_name,
            message: format!("expected a JSON object, found {}", kind_of(&other)),
        }),
        Err(e) => Err(RuleError::MalformedCatalog {
            source_name,
            message: e.to_string(),
        }),
    }
}

/// Merge base and override documents, override winning per key.
///
/// Entries that do not deserialize are skipped and reported through
/// `warnings`; they never abort the merge.
pub fn merge(
    base: &CatalogDocument,
    overlay: &CatalogDocument,
    warnings: &mut Vec<RuleError>,
) -> RuleSet {
    let mut rules = BTreeMap::new();

    let keys = base.keys().chain(overlay.keys().filter(|k| !base.contains_key(*k)));
    for key in keys {
        let Some(value) = overlay.get(key).or_else(|| base.get(key)) else {
            continue;
        };

        match serde_json::from_value::<RawRule>(value.clone()) {
            Ok(raw) => {
                rules.insert(key.clone(), SiteRule::from(raw));
            }
            Err(e) => {
                warn!("Skipped invalid rule format for key {}: {}", key, e);
                warnings.push(RuleError::MalformedEntry {
                    key: key.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    RuleSet { rules }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
