use chirp_common::{IndexEntry, ResolutionSource, ResolvedLocation};
use std::sync::Arc;
use strsim::jaro_winkler;
use tracing::{debug, info, warn};

use super::geocode::{Geocoder, HttpGeocoder};
use super::reference::{ZipReference, normalize_zip};
use super::MatchMode;
use crate::config::AppConfig;
use crate::module::catalog::urls::{search_url, zip_url};
use crate::module::catalog::{PageSource, first_ctid_link, strip_title_decorations};
use crate::module::index::IndexStore;

/// Comparable form of a place or page title.
pub fn normalize_title(title: &str) -> String {
    strip_title_decorations(title).to_lowercase()
}

struct IndexedTitle {
    ctid: u32,
    title: String,
    normalized: String,
}

/// Catalog pages consulted when neither the reference table nor geocoding
/// leads to an indexed title
struct CatalogLookup {
    source: Arc<dyn PageSource>,
    base_url: String,
}

pub struct ZipResolver {
    reference: ZipReference,
    /// Valid index entries in ascending CTID order
    titles: Vec<IndexedTitle>,
    match_mode: MatchMode,
    fuzzy_threshold: f64,
    geocoder: Option<Arc<dyn Geocoder>>,
    catalog: Option<CatalogLookup>,
}

impl ZipResolver {
    pub fn new(
        reference: ZipReference,
        entries: impl IntoIterator<Item = IndexEntry>,
        match_mode: MatchMode,
        fuzzy_threshold: f64,
        geocoder: Option<Arc<dyn Geocoder>>,
    ) -> Self {
        let mut titles: Vec<IndexedTitle> = entries
            .into_iter()
            .filter(IndexEntry::is_valid)
            .map(|entry| IndexedTitle {
                ctid: entry.id,
                normalized: normalize_title(&entry.title),
                title: entry.title,
            })
            .collect();
        titles.sort_by_key(|t| t.ctid);

        Self {
            reference,
            titles,
            match_mode,
            fuzzy_threshold,
            geocoder,
            catalog: None,
        }
    }

    /// Also look ZIP codes up on the catalog's ZIP pages and site search.
    pub fn with_catalog(mut self, source: Arc<dyn PageSource>, base_url: impl Into<String>) -> Self {
        self.catalog = Some(CatalogLookup {
            source,
            base_url: base_url.into(),
        });
        self
    }

    /// Builds a resolver from configuration, geocoding and consulting the
    /// catalog through `source`. An unreadable index or reference table
    /// degrades resolution instead of failing it.
    pub fn from_config(config: &AppConfig, source: Arc<dyn PageSource>) -> Self {
        let zip = &config.zip;
        let reference = ZipReference::load(&zip.reference_path).unwrap_or_else(|e| {
            warn!("ZIP reference table unavailable: {}", e);
            ZipReference::default()
        });
        let entries = IndexStore::new(&config.index.path).valid_entries().unwrap_or_else(|e| {
            warn!("CTID index unavailable, ZIP codes will not resolve: {}", e);
            Vec::new()
        });
        let geocoder: Option<Arc<dyn Geocoder>> = if zip.geocode {
            Some(Arc::new(HttpGeocoder::new(
                source.clone(),
                zip.zippopotam_url.clone(),
                zip.nominatim_url.clone(),
            )))
        } else {
            None
        };

        let resolver = Self::new(reference, entries, zip.match_mode, zip.fuzzy_threshold, geocoder);
        if zip.catalog_lookup {
            resolver.with_catalog(source, config.catalog.base_url.clone())
        } else {
            resolver
        }
    }

    /// Best index entry for a place title, as `(ctid, index title)`.
    pub fn match_title(&self, place: &str) -> Option<(u32, &str)> {
        let query = normalize_title(place);
        if query.is_empty() {
            return None;
        }

        let found = match self.match_mode {
            MatchMode::Exact => self.titles.iter().find(|t| t.normalized == query),
            MatchMode::Prefix => self.titles.iter().find(|t| t.normalized.starts_with(&query)),
            MatchMode::Fuzzy => {
                let mut best: Option<(&IndexedTitle, f64)> = None;
                for candidate in &self.titles {
                    let score = jaro_winkler(&query, &candidate.normalized);
                    if score < self.fuzzy_threshold {
                        continue;
                    }
                    // strictly better only, so equal scores keep the lower CTID
                    if best.is_none_or(|(_, best_score)| score > best_score) {
                        best = Some((candidate, score));
                    }
                }
                best.map(|(t, _)| t)
            }
        };

        found.map(|t| (t.ctid, t.title.as_str()))
    }

    /// Maps a ZIP code to a CTID. Never fails: an unresolved ZIP comes back
    /// without a CTID so the caller can fall back to the ZIP-level listing.
    pub async fn resolve(&self, zip: &str) -> ResolvedLocation {
        let Some(zip) = normalize_zip(zip) else {
            warn!("'{}' is not a ZIP code", zip.trim());
            return unresolved(zip.trim().to_string());
        };

        if let Some(place) = self.reference.title_for(&zip) {
            if let Some((ctid, title)) = self.match_title(place) {
                info!("ZIP {} -> CTID {} ({})", zip, ctid, title);
                return ResolvedLocation {
                    zip,
                    ctid: Some(ctid),
                    source: ResolutionSource::Index,
                    title: Some(title.to_string()),
                };
            }
            debug!("Reference title '{}' for {} has no index match", place, zip);
        }

        if let Some(found) = self.catalog_ctid(&zip, |base| zip_url(base, &zip)).await {
            return found;
        }

        let Some(geocoder) = &self.geocoder else {
            info!("ZIP {} not in index and geocoding is off", zip);
            return unresolved(zip);
        };

        let place = match geocoder.place_for_zip(&zip).await {
            Ok(Some(place)) => place,
            Ok(None) => {
                info!("Geocoding found no place for {}", zip);
                return unresolved(zip);
            }
            Err(e) => {
                warn!("Geocoding {} failed: {}", zip, e);
                return unresolved(zip);
            }
        };

        if let Some((ctid, title)) = self.match_title(&place) {
            info!("ZIP {} -> CTID {} ({}) via geocoding", zip, ctid, title);
            return ResolvedLocation {
                zip,
                ctid: Some(ctid),
                source: ResolutionSource::GeocodeFallback,
                title: Some(title.to_string()),
            };
        }
        info!("Geocoded place '{}' for {} has no index match", place, zip);

        let query = place.split(',').map(str::trim).collect::<Vec<_>>().join(" ");
        if let Some(found) = self.catalog_ctid(&zip, |base| search_url(base, &query)).await {
            return found;
        }
        unresolved(zip)
    }

    /// First CTID linked from the catalog page at `url`, if a catalog is set.
    async fn catalog_ctid(&self, zip: &str, url: impl FnOnce(&str) -> String) -> Option<ResolvedLocation> {
        let catalog = self.catalog.as_ref()?;
        let url = url(&catalog.base_url);

        let page = match catalog.source.fetch(&url).await {
            Ok(page) if page.is_success() => page,
            Ok(page) => {
                debug!("Catalog lookup {} -> HTTP {}", url, page.status);
                return None;
            }
            Err(e) => {
                warn!("Catalog lookup {} failed: {}", url, e);
                return None;
            }
        };

        match first_ctid_link(&page.body) {
            Ok(Some((ctid, text))) => {
                info!("ZIP {} -> CTID {} via {}", zip, ctid, url);
                Some(ResolvedLocation {
                    zip: zip.to_string(),
                    ctid: Some(ctid),
                    source: ResolutionSource::GeocodeFallback,
                    title: (!text.is_empty()).then_some(text),
                })
            }
            Ok(None) => {
                debug!("No county link on {}", url);
                None
            }
            Err(e) => {
                warn!("Could not read {}: {}", url, e);
                None
            }
        }
    }
}

fn unresolved(zip: String) -> ResolvedLocation {
    ResolvedLocation {
        zip,
        ctid: None,
        source: ResolutionSource::GeocodeFallback,
        title: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChirpError, Result};
    use crate::module::catalog::FetchedPage;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedGeocoder(Option<String>);

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn place_for_zip(&self, _zip: &str) -> Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    struct FailingGeocoder;

    #[async_trait]
    impl Geocoder for FailingGeocoder {
        async fn place_for_zip(&self, zip: &str) -> Result<Option<String>> {
            Err(ChirpError::TransientFetch {
                url: format!("https://api.zippopotam.us/us/{}", zip),
                attempts: 3,
                message: "connection refused".into(),
            })
        }
    }

    /// Serves the given pages and answers 404 for anything else
    #[derive(Default)]
    struct FakePages {
        pages: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl FakePages {
        fn with(pages: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                pages: pages.iter().map(|(u, b)| (u.to_string(), b.to_string())).collect(),
                ..Default::default()
            })
        }

        fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for FakePages {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            self.requests.lock().unwrap().push(url.to_string());
            Ok(match self.pages.get(url) {
                Some(body) => FetchedPage {
                    url: url.to_string(),
                    status: 200,
                    body: body.clone(),
                },
                None => FetchedPage {
                    url: url.to_string(),
                    status: 404,
                    body: String::new(),
                },
            })
        }
    }

    fn index() -> Vec<IndexEntry> {
        vec![
            IndexEntry::valid(560, "Lake County, Illinois"),
            IndexEntry::valid(210, "Cook County, Illinois"),
            IndexEntry::miss(211),
            IndexEntry::valid(900, "Cook County, Minnesota"),
            IndexEntry::valid(300, "Orleans Parish, Louisiana"),
        ]
    }

    fn resolver(mode: MatchMode, geocoder: Option<Arc<dyn Geocoder>>) -> ZipResolver {
        let reference = ZipReference::from_pairs([
            ("60601", "Cook County, Illinois (IL) Amateur Radio"),
            ("60045", "Lake County"),
            ("99999", "Nowhere County, Nevada"),
        ]);
        ZipResolver::new(reference, index(), mode, 0.92, geocoder)
    }

    #[tokio::test]
    async fn test_reference_title_matches_index() {
        let location = resolver(MatchMode::Exact, None).resolve("60601").await;
        assert_eq!(location.ctid, Some(210));
        assert_eq!(location.source, ResolutionSource::Index);
        assert_eq!(location.title.as_deref(), Some("Cook County, Illinois"));
    }

    #[tokio::test]
    async fn test_no_match_and_failing_geocode_falls_back() {
        let location = resolver(MatchMode::Exact, Some(Arc::new(FailingGeocoder)))
            .resolve("99999")
            .await;
        assert_eq!(location.zip, "99999");
        assert_eq!(location.ctid, None);
        assert_eq!(location.source, ResolutionSource::GeocodeFallback);
    }

    #[tokio::test]
    async fn test_geocoded_place_is_matched() {
        let geocoder = FixedGeocoder(Some("Orleans Parish, Louisiana".into()));
        let location = resolver(MatchMode::Exact, Some(Arc::new(geocoder)))
            .resolve("70112")
            .await;
        assert_eq!(location.ctid, Some(300));
        assert_eq!(location.source, ResolutionSource::GeocodeFallback);
    }

    #[tokio::test]
    async fn test_invalid_zip_is_unresolved() {
        let location = resolver(MatchMode::Exact, None).resolve("not-a-zip").await;
        assert_eq!(location.ctid, None);
        assert_eq!(location.source, ResolutionSource::GeocodeFallback);
    }

    #[tokio::test]
    async fn test_zip_page_link_resolves_unindexed_zip() {
        let pages = FakePages::with(&[(
            "https://rr.test/db/browse/zip/99999/ham",
            r#"<p>ZIP 99999 is in <a href="/db/browse/ctid/4242/ham">Nye County</a></p>"#,
        )]);
        let resolver = resolver(MatchMode::Exact, None).with_catalog(pages.clone(), "https://rr.test");

        let location = resolver.resolve("99999").await;

        assert_eq!(location.ctid, Some(4242));
        assert_eq!(location.source, ResolutionSource::GeocodeFallback);
        assert_eq!(location.title.as_deref(), Some("Nye County"));
        assert_eq!(pages.requested(), vec!["https://rr.test/db/browse/zip/99999/ham"]);
    }

    #[tokio::test]
    async fn test_geocoded_place_is_searched_on_catalog() {
        let pages = FakePages::with(&[(
            "https://rr.test/search/?q=Jefferson%20Parish%20Louisiana",
            r#"<ul><li><a href="/db/browse/ctid/301">Jefferson Parish</a></li></ul>"#,
        )]);
        let geocoder = FixedGeocoder(Some("Jefferson Parish, Louisiana".into()));
        let resolver = resolver(MatchMode::Exact, Some(Arc::new(geocoder)))
            .with_catalog(pages.clone(), "https://rr.test");

        let location = resolver.resolve("70072").await;

        assert_eq!(location.ctid, Some(301));
        assert_eq!(location.title.as_deref(), Some("Jefferson Parish"));
        assert_eq!(
            pages.requested(),
            vec![
                "https://rr.test/db/browse/zip/70072/ham",
                "https://rr.test/search/?q=Jefferson%20Parish%20Louisiana",
            ]
        );
    }

    #[tokio::test]
    async fn test_indexed_zip_skips_catalog() {
        let pages = FakePages::with(&[]);
        let resolver = resolver(MatchMode::Exact, None).with_catalog(pages.clone(), "https://rr.test");

        assert_eq!(resolver.resolve("60601").await.ctid, Some(210));
        assert!(pages.requested().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_without_county_link_stays_unresolved() {
        let pages = FakePages::with(&[(
            "https://rr.test/db/browse/zip/99999/ham",
            "<p>No results</p>",
        )]);
        let resolver = resolver(MatchMode::Exact, Some(Arc::new(FixedGeocoder(None))))
            .with_catalog(pages, "https://rr.test");

        let location = resolver.resolve("99999").await;
        assert_eq!(location.ctid, None);
        assert_eq!(location.source, ResolutionSource::GeocodeFallback);
    }

    #[test]
    fn test_prefix_prefers_lowest_ctid() {
        let resolver = resolver(MatchMode::Prefix, None);
        assert_eq!(resolver.match_title("Cook County").map(|m| m.0), Some(210));
        assert_eq!(resolver.match_title("Lake County").map(|m| m.0), Some(560));
        assert_eq!(resolver.match_title("Kane County"), None);
    }

    #[test]
    fn test_exact_ignores_case_and_decorations() {
        let resolver = resolver(MatchMode::Exact, None);
        assert_eq!(
            resolver.match_title("COOK COUNTY,  ILLINOIS Amateur Radio").map(|m| m.0),
            Some(210)
        );
        assert_eq!(resolver.match_title("Cook County"), None);
    }

    #[test]
    fn test_fuzzy_takes_closest_title() {
        let resolver = resolver(MatchMode::Fuzzy, None);
        assert_eq!(resolver.match_title("Cook County, Ilinois").map(|m| m.0), Some(210));
        assert_eq!(resolver.match_title("Cook County, Minesota").map(|m| m.0), Some(900));
        assert_eq!(resolver.match_title("Maricopa County, Arizona"), None);
    }
}
