pub mod catalog;
pub mod channel;
pub mod index;
pub mod scrape;
pub mod zip;
