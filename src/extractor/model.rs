use regex::Regex;
use std::sync::LazyLock;

static SPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static NEWLINE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Article produced by a generic readability pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadableArticle {
    pub title: Option<String>,
    pub text: String,
    pub html: String,
}

impl ReadableArticle {
    /// Character count of the visible text, the measure acceptance
    /// thresholds are expressed in.
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    let spaced = SPACE_REGEX.replace_all(text.trim(), " ");
    NEWLINE_REGEX.replace_all(&spaced, "\n\n").to_string()
}
