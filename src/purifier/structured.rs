//! Article bodies embedded as data rather than markup: `ld+json` blocks and
//! framework state blobs such as `__NEXT_DATA__`.

use kuchiki::NodeRef;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::dom;
use crate::purifier::PurifyError;

/// Field names tried in order inside `__NEXT_DATA__`, each matched as a
/// complete JSON string literal.
static NEXT_DATA_FIELDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["contentHtml", "body", "BodyPlainText", "content", "html", "articleBody"]
        .iter()
        .map(|field| {
            Regex::new(&format!(r#""{field}"\s*:\s*"((?:[^"\\]|\\.)*)""#)).unwrap()
        })
        .collect()
});

/// Scan `application/ld+json` blocks for an `articleBody` or `text` field.
///
/// Blocks that fail to parse are skipped; the error of the last one is
/// returned only when nothing was found.
pub fn ld_json(document: &NodeRef) -> Result<Option<String>, PurifyError> {
    let mut last_error = None;

    for script in dom::select_all(document, r#"script[type="application/ld+json"]"#) {
        let data = script.as_node().text_contents();
        let lowered = data.to_lowercase();
        if !lowered.contains(r#""articlebody""#) && !lowered.contains(r#""text""#) {
            continue;
        }

        let value: Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(e) => {
                last_error = Some(PurifyError::Json(e));
                continue;
            }
        };

        if let Some(body) = article_object(&value).and_then(|obj| text_field(obj, &["articleBody", "text"])) {
            return Ok(Some(paragraphs(body)));
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// Unwrap the common ld+json envelopes: a top-level array, or an `@graph`.
fn article_object(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Object(obj) => match obj.get("@graph") {
            Some(Value::Array(graph)) => graph.iter().find(|item| {
                item.get("articleBody").is_some() || item.get("text").is_some()
            }),
            _ => Some(value),
        },
        _ => None,
    }
}

/// Pull the first matching field out of the `__NEXT_DATA__` script.
pub fn next_data(document: &NodeRef) -> Result<Option<String>, PurifyError> {
    let Some(script) = dom::select_first(document, "script#__NEXT_DATA__") else {
        return Ok(None);
    };
    let data = script.as_node().text_contents();

    for regex in NEXT_DATA_FIELDS.iter() {
        let Some(raw) = regex.captures(&data).and_then(|caps| caps.get(1)) else {
            continue;
        };
        let decoded: String = serde_json::from_str(&format!("\"{}\"", raw.as_str()))?;
        if decoded.trim().is_empty() {
            continue;
        }
        return Ok(Some(format!("<div>{}</div>", decoded.replace('\n', "<br>"))));
    }
    Ok(None)
}

/// First non-empty string among `fields`.
pub fn text_field<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| value.get(field).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())
}

/// Plain text to a paragraph-per-line fragment.
pub fn paragraphs(text: &str) -> String {
    let body = text
        .split('\n')
        .map(|line| html_escape::encode_text(line).into_owned())
        .collect::<Vec<_>>()
        .join("</p><p>");
    format!("<div><p>{body}</p></div>")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_ld(json: &str) -> NodeRef {
        dom::parse(&format!(
            r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#
        ))
    }

    #[test]
    fn test_ld_json_article_body() {
        let document = doc_with_ld(r#"{"articleBody":"Hello\nWorld"}"#);
        assert_eq!(
            ld_json(&document).unwrap().as_deref(),
            Some("<div><p>Hello</p><p>World</p></div>")
        );
    }

    #[test]
    fn test_ld_json_array_and_graph() {
        let document = doc_with_ld(r#"[{"@type":"NewsArticle","text":"From array"}]"#);
        assert_eq!(
            ld_json(&document).unwrap().as_deref(),
            Some("<div><p>From array</p></div>")
        );

        let document = doc_with_ld(
            r#"{"@graph":[{"@type":"WebPage"},{"@type":"Article","articleBody":"From graph"}]}"#,
        );
        assert_eq!(
            ld_json(&document).unwrap().as_deref(),
            Some("<div><p>From graph</p></div>")
        );
    }

    #[test]
    fn test_ld_json_escapes_markup() {
        let document = doc_with_ld(r#"{"articleBody":"a < b & c"}"#);
        assert_eq!(
            ld_json(&document).unwrap().as_deref(),
            Some("<div><p>a &lt; b &amp; c</p></div>")
        );
    }

    #[test]
    fn test_ld_json_without_body_fields() {
        let document = doc_with_ld(r#"{"@type":"Organization","name":"Paper"}"#);
        assert_eq!(ld_json(&document).unwrap(), None);
    }

    #[test]
    fn test_ld_json_malformed_is_an_error() {
        let document = doc_with_ld(r#"{"articleBody": "unterminated"#);
        assert!(matches!(ld_json(&document), Err(PurifyError::Json(_))));
    }

    #[test]
    fn test_next_data_field_order_and_unescape() {
        let document = dom::parse(
            r#"<script id="__NEXT_DATA__" type="application/json">
               {"props":{"title":"t","body":"<p>Line \"one\"</p>\n<a href=\"https:\/\/x.com\">x</a>","contentHtml":""}}
               </script>"#,
        );
        assert_eq!(
            next_data(&document).unwrap().as_deref(),
            Some(r#"<div><p>Line "one"</p><br><a href="https://x.com">x</a></div>"#)
        );
    }

    #[test]
    fn test_next_data_missing() {
        let document = dom::parse("<p>No state</p>");
        assert_eq!(next_data(&document).unwrap(), None);
    }
}
