use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("io error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed catalog {source_name}: {message}")]
    MalformedCatalog {
        source_name: &'static str,
        message: String,
    },

    #[error("skipped malformed rule {key}: {message}")]
    MalformedEntry { key: String, message: String },

    #[error("no usable rule catalog, keeping previous rules: {0}")]
    Fatal(String),
}

impl RuleError {
    pub fn io(path: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}
