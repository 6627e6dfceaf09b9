pub mod client;
pub mod errors;
pub mod pipeline;
pub mod shaper;
pub mod types;

pub use client::{BROWSER_USER_AGENT, HttpFetcher};
pub use errors::FetchError;
pub use shaper::{OutgoingRequest, shape, shape_with_rng};
pub use types::{Charset, PageResponse};
