///! ZIP code -> CTID resolution
///!
///! A ZIP code is turned into a place title (static reference table first,
///! geocoding second) and that title is matched against the valid titles of
///! the CTID index. When the index has no match, the catalog's own ZIP page
///! and site search can still point at a CTID.

pub mod geocode;
pub mod reference;
pub mod resolver;

use serde::{Deserialize, Serialize};

pub use geocode::{Geocoder, HttpGeocoder};
pub use reference::{ZipReference, normalize_zip};
pub use resolver::{ZipResolver, normalize_title};

/// How a place title is compared with index titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Normalized titles are equal
    #[default]
    Exact,
    /// The index title starts with the place title
    Prefix,
    /// Jaro-Winkler similarity at or above the configured threshold
    Fuzzy,
}
