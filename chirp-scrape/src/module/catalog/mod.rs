///! RadioReference catalog access
///!
///! Transport (`fetcher`), page parsing (`parser`) and the URL shapes of the
///! catalog's listing pages (`urls`).

pub mod fetcher;
pub mod parser;
pub mod urls;

pub use fetcher::{FetchedPage, FetcherOptions, HttpFetcher, Pacer, PageSource};
pub use parser::{
    first_ctid_link, is_jurisdiction_title, parse_detail, parse_listing, parse_title,
    strip_title_decorations, subcategory_links,
};
