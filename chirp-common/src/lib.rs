//! Data model shared by the crawler, the scrape pipeline and its callers.

mod types;

pub use types::*;
