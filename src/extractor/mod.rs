pub mod cleaner;
pub mod model;
pub mod reader;

pub use cleaner::strip_title_heading;
pub use model::ReadableArticle;
pub use reader::{ArticleExtractor, ReadabilityExtractor};

#[cfg(test)]
mod tests;
