///! CTID index: the append-only id -> title file and the crawler that grows it

pub mod crawler;
pub mod store;

pub use crawler::{CrawlOptions, CrawlReport, CrawlState, IndexCrawler, StopReason};
pub use store::{IndexStore, IndexWriter};
