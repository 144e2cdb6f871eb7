///! Scrape pipeline
///!
///! resolve -> fetch -> parse -> band assignment -> fixed channels ->
///! normalize. Failures of a single page or detail fetch become diagnostics;
///! only configuration problems abort a run, and they do so before any
///! request is made.

use chirp_common::{Band, ChannelRecord, ResolvedLocation};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{AppConfig, ScrapeConfig};
use crate::diagnostics::{Diagnostics, Stage};
use crate::error::{ChirpError, Result};
use crate::module::catalog::urls::{ctid_url, zip_url};
use crate::module::catalog::{
    PageSource, parse_detail, parse_listing, parse_title, strip_title_decorations, subcategory_links,
};
use crate::module::channel::{BandDefaultsStore, ChannelNormalizer, NormalizePolicy};
use crate::module::zip::{ZipResolver, normalize_zip};

/// What to scrape: a ZIP code or a catalog id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Zip(String),
    Ctid(u32),
}

impl std::str::FromStr for Target {
    type Err = String;

    /// Accepts `60601`, `60601-1234`, `ctid:1234` and catalog URLs
    /// containing `/ctid/1234`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(id) = s.strip_prefix("ctid:") {
            return id
                .trim()
                .parse()
                .map(Target::Ctid)
                .map_err(|_| format!("Invalid CTID: {}", id));
        }
        if let Some(rest) = s.split("/ctid/").nth(1) {
            let id = rest.split('/').next().unwrap_or_default();
            return id
                .parse()
                .map(Target::Ctid)
                .map_err(|_| format!("Invalid CTID in URL: {}", s));
        }
        normalize_zip(s)
            .map(Target::Zip)
            .ok_or_else(|| format!("Not a ZIP code, ctid:<id> or catalog URL: {}", s))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Zip(zip) => write!(f, "ZIP {}", zip),
            Target::Ctid(id) => write!(f, "CTID {}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub targets: Vec<Target>,
    /// Selection order decides band assignment and output order
    pub bands: Vec<Band>,
}

#[derive(Debug)]
pub struct ScrapeOutcome {
    pub locations: Vec<ResolvedLocation>,
    pub records: Vec<ChannelRecord>,
    pub diagnostics: Diagnostics,
}

/// A listing page to scrape and the label its channels are tagged with
#[derive(Debug, Clone)]
struct Page {
    url: String,
    label: Option<String>,
    fallback_label: String,
}

pub struct ScrapePipeline {
    source: Arc<dyn PageSource>,
    resolver: ZipResolver,
    defaults: BandDefaultsStore,
    base_url: String,
    options: ScrapeConfig,
}

impl ScrapePipeline {
    pub fn new(
        source: Arc<dyn PageSource>,
        resolver: ZipResolver,
        defaults: BandDefaultsStore,
        base_url: impl Into<String>,
        options: ScrapeConfig,
    ) -> Self {
        Self {
            source,
            resolver,
            defaults,
            base_url: base_url.into(),
            options,
        }
    }

    /// Loads the defaults of `bands` (failing fast) and wires the resolver.
    pub fn from_config(config: &AppConfig, source: Arc<dyn PageSource>, bands: &[Band]) -> Result<Self> {
        let defaults = BandDefaultsStore::load(config, bands)?;

        let resolver = ZipResolver::from_config(config, source.clone());

        Ok(Self::new(
            source,
            resolver,
            defaults,
            config.catalog.base_url.clone(),
            config.scrape.clone(),
        ))
    }

    pub fn resolver(&self) -> &ZipResolver {
        &self.resolver
    }

    fn policy(&self) -> NormalizePolicy {
        NormalizePolicy {
            drop_missing_rtone: self.options.drop_missing_rtone,
            infer_duplex: self.options.infer_duplex,
        }
    }

    pub async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapeOutcome> {
        let mut bands: Vec<Band> = Vec::new();
        for band in &request.bands {
            if !bands.contains(band) {
                bands.push(*band);
            }
        }
        if bands.is_empty() {
            return Err(ChirpError::Config("no bands selected".into()));
        }
        let loaded: HashSet<Band> = self.defaults.bands().collect();
        if let Some(band) = bands.iter().find(|b| !loaded.contains(*b)) {
            return Err(ChirpError::MissingDefaults {
                band: *band,
                path: std::path::PathBuf::new(),
            });
        }

        let mut diagnostics = Diagnostics::new();
        let mut locations = Vec::new();
        let mut scraped: Vec<ChannelRecord> = Vec::new();

        let pages = self.pages_for(&request.targets, &mut locations, &mut diagnostics).await;
        let mut visited: HashSet<String> = HashSet::new();
        for page in pages {
            scraped.extend(self.scrape_page(&page, &mut visited, &mut diagnostics).await);
        }

        info!("Scraped {} raw rows from {} target(s)", scraped.len(), request.targets.len());

        let mut by_band: Vec<Vec<ChannelRecord>> = vec![Vec::new(); bands.len()];
        let mut unassigned = 0;
        for mut record in scraped {
            match bands.iter().position(|b| b.contains(record.frequency_mhz)) {
                Some(i) => {
                    record.band = Some(bands[i]);
                    by_band[i].push(record);
                }
                None => unassigned += 1,
            }
        }
        if unassigned > 0 {
            debug!("{} scraped rows are outside the selected bands", unassigned);
        }

        let normalizer = ChannelNormalizer::new(&self.defaults, self.policy());
        let mut records = Vec::new();
        for (band, band_records) in bands.iter().zip(by_band) {
            let mut input = self.defaults.fixed_channels(*band);
            input.extend(band_records);
            records.extend(normalizer.normalize(input, *band));
        }

        info!(
            "Scrape produced {} channels, {} diagnostic(s)",
            records.len(),
            diagnostics.len()
        );

        Ok(ScrapeOutcome {
            locations,
            records,
            diagnostics,
        })
    }

    async fn pages_for(
        &self,
        targets: &[Target],
        locations: &mut Vec<ResolvedLocation>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<Page> {
        let mut pages: Vec<Page> = Vec::new();

        for target in targets {
            let page = match target {
                Target::Ctid(id) => Page {
                    url: ctid_url(&self.base_url, *id),
                    label: None,
                    fallback_label: target.to_string(),
                },
                Target::Zip(zip) => {
                    let location = self.resolver.resolve(zip).await;
                    let page = match location.ctid {
                        Some(ctid) => Page {
                            url: ctid_url(&self.base_url, ctid),
                            label: location.title.clone(),
                            fallback_label: target.to_string(),
                        },
                        None => {
                            diagnostics.info(
                                Stage::Resolve,
                                target.to_string(),
                                "no CTID found, scraping the ZIP-level listing",
                            );
                            Page {
                                url: zip_url(&self.base_url, &location.zip),
                                label: None,
                                fallback_label: target.to_string(),
                            }
                        }
                    };
                    locations.push(location);
                    page
                }
            };

            if pages.iter().any(|p| p.url == page.url) {
                debug!("{} resolves to an already selected page", target);
                continue;
            }
            pages.push(page);
        }

        pages
    }

    async fn fetch_body(&self, url: &str, diagnostics: &mut Diagnostics) -> Option<String> {
        match self.source.fetch(url).await {
            Ok(page) if page.is_success() => Some(page.body),
            Ok(page) => {
                diagnostics.warn(Stage::Fetch, url, format!("HTTP {}", page.status));
                None
            }
            Err(e) => {
                diagnostics.warn(Stage::Fetch, url, e.to_string());
                None
            }
        }
    }

    async fn scrape_page(
        &self,
        page: &Page,
        visited: &mut HashSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<ChannelRecord> {
        if !visited.insert(page.url.clone()) {
            return Vec::new();
        }
        let Some(body) = self.fetch_body(&page.url, diagnostics).await else {
            return Vec::new();
        };

        let label = page
            .label
            .clone()
            .or_else(|| parse_title(&body).map(|t| strip_title_decorations(&t)))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| page.fallback_label.clone());

        let mut records = match parse_listing(&body, &self.base_url) {
            Ok(records) => records,
            Err(e) => {
                diagnostics.warn(Stage::Parse, &page.url, e.to_string());
                Vec::new()
            }
        };
        debug!("{} rows on {}", records.len(), page.url);

        if self.options.follow_subcategories {
            match subcategory_links(&body, &self.base_url) {
                Ok(links) => {
                    for link in links {
                        if !visited.insert(link.clone()) {
                            continue;
                        }
                        let Some(sub_body) = self.fetch_body(&link, diagnostics).await else {
                            continue;
                        };
                        match parse_listing(&sub_body, &self.base_url) {
                            Ok(sub_records) => records.extend(sub_records),
                            Err(e) => diagnostics.warn(Stage::Parse, &link, e.to_string()),
                        }
                    }
                }
                Err(e) => diagnostics.warn(Stage::Parse, &page.url, e.to_string()),
            }
        }

        if self.options.fetch_details {
            for record in records.iter_mut() {
                let Some(url) = record.detail_url.clone() else {
                    continue;
                };
                let Some(detail_body) = self.fetch_body(&url, diagnostics).await else {
                    continue;
                };
                match parse_detail(&detail_body, record) {
                    Ok(detailed) => *record = detailed,
                    Err(e) => diagnostics.warn(Stage::Parse, &url, e.to_string()),
                }
            }
        }

        for record in records.iter_mut() {
            if record.comment.is_empty() {
                record.comment = label.clone();
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::catalog::FetchedPage;
    use crate::module::zip::{MatchMode, ZipReference};
    use async_trait::async_trait;
    use chirp_common::{BandDefault, DefaultFrequency, Duplex, IndexEntry, ResolutionSource};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const CTID_PAGE: &str = r#"<html><head><title>Cook County, Illinois Amateur Radio - RadioReference</title></head><body>
        <table class="rrdbTable">
          <tr><th>Frequency</th><th>Input</th><th>Call</th><th>Description</th><th>Tone</th></tr>
          <tr><td>146.760</td><td>146.160</td><td>W9AA</td><td>Loop</td><td>107.2</td></tr>
          <tr><td>443.200</td><td>448.200</td><td>W9BB</td><td>North</td><td></td></tr>
          <tr><td>29.620</td><td>29.520</td><td>W9CC</td><td>Ten meter</td><td></td></tr>
        </table></body></html>"#;

    #[derive(Default)]
    struct FakeSource {
        pages: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            self.requests.lock().unwrap().push(url.to_string());
            Ok(match self.pages.get(url) {
                Some(body) => FetchedPage {
                    url: url.into(),
                    status: 200,
                    body: body.clone(),
                },
                None => FetchedPage {
                    url: url.into(),
                    status: 404,
                    body: String::new(),
                },
            })
        }
    }

    fn defaults() -> BandDefaultsStore {
        let wide = |band| BandDefault {
            r_tone_freq: Some(88.5),
            c_tone_freq: Some(88.5),
            ..BandDefault::band_wide(band)
        };
        let two_meter = BandDefault {
            offset_mhz: Some(0.6),
            ..wide(Band::TwoMeter)
        };
        let noaa = BandDefault {
            name: Some("WX1".into()),
            frequency: DefaultFrequency::Channel(162.4),
            ..BandDefault::band_wide(Band::Noaa)
        };
        BandDefaultsStore::from_tables([
            (Band::TwoMeter, vec![two_meter]),
            (Band::SeventyCm, vec![wide(Band::SeventyCm)]),
            (Band::Noaa, vec![noaa]),
        ])
    }

    fn pipeline(source: Arc<FakeSource>) -> ScrapePipeline {
        pipeline_with(source, ScrapeConfig::default())
    }

    fn pipeline_with(source: Arc<FakeSource>, options: ScrapeConfig) -> ScrapePipeline {
        let resolver = ZipResolver::new(
            ZipReference::from_pairs([("60601", "Cook County, Illinois")]),
            vec![IndexEntry::valid(27, "Cook County, Illinois")],
            MatchMode::Exact,
            0.92,
            None,
        );
        ScrapePipeline::new(source, resolver, defaults(), "https://rr.test", options)
    }

    fn source_with(pages: &[(&str, &str)]) -> Arc<FakeSource> {
        Arc::new(FakeSource {
            pages: pages.iter().map(|(u, b)| (u.to_string(), b.to_string())).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("60601".parse::<Target>(), Ok(Target::Zip("60601".into())));
        assert_eq!("ctid:27".parse::<Target>(), Ok(Target::Ctid(27)));
        assert_eq!(
            "https://www.radioreference.com/db/browse/ctid/27/ham".parse::<Target>(),
            Ok(Target::Ctid(27))
        );
        assert!("Chicago".parse::<Target>().is_err());
    }

    #[tokio::test]
    async fn test_zip_scrape_assigns_bands_in_selection_order() {
        let source = source_with(&[("https://rr.test/db/browse/ctid/27/ham", CTID_PAGE)]);
        let pipeline = pipeline(source);

        let outcome = pipeline
            .scrape(&ScrapeRequest {
                targets: vec![Target::Zip("60601".into())],
                bands: vec![Band::SeventyCm, Band::TwoMeter, Band::Noaa],
            })
            .await
            .unwrap();

        assert_eq!(outcome.locations[0].ctid, Some(27));
        assert_eq!(outcome.locations[0].source, ResolutionSource::Index);

        let names: Vec<&str> = outcome.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["W9BB", "W9AA", "WX1"]);

        let w9aa = &outcome.records[1];
        assert_eq!(w9aa.comment, "Cook County, Illinois");
        assert_eq!(w9aa.duplex, Some(Duplex::Minus));
        assert_eq!(w9aa.r_tone_freq, Some(107.2));
        assert_eq!(outcome.records[0].r_tone_freq, Some(88.5));
        assert_eq!(outcome.records[2].duplex, Some(Duplex::Simplex));
        assert!(outcome.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_zip_scrapes_zip_listing() {
        let source = source_with(&[("https://rr.test/db/browse/zip/99999/ham", CTID_PAGE)]);
        let pipeline = pipeline(source.clone());

        let outcome = pipeline
            .scrape(&ScrapeRequest {
                targets: vec![Target::Zip("99999".into())],
                bands: vec![Band::TwoMeter],
            })
            .await
            .unwrap();

        assert_eq!(outcome.locations[0].ctid, None);
        assert_eq!(outcome.locations[0].source, ResolutionSource::GeocodeFallback);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(
            source.requests.lock().unwrap().as_slice(),
            ["https://rr.test/db/browse/zip/99999/ham"]
        );
    }

    #[tokio::test]
    async fn test_page_failures_become_diagnostics() {
        let source = source_with(&[("https://rr.test/db/browse/ctid/2/ham", "<html><p>gone</p></html>")]);
        let pipeline = pipeline(source);

        let outcome = pipeline
            .scrape(&ScrapeRequest {
                targets: vec![Target::Ctid(1), Target::Ctid(2), Target::Ctid(1)],
                bands: vec![Band::TwoMeter],
            })
            .await
            .unwrap();

        assert!(outcome.records.is_empty());
        let stages: Vec<Stage> = outcome.diagnostics.warnings().map(|d| d.stage).collect();
        assert_eq!(stages, vec![Stage::Fetch, Stage::Parse]);
    }

    #[tokio::test]
    async fn test_detail_pages_fill_rows_and_failures_keep_rows() {
        let listing = r#"<html><head><title>Cook County, Illinois Amateur Radio</title></head><body>
            <table class="rrdbTable">
              <tr><th>Frequency</th><th>Input</th><th>Call</th><th>Description</th><th>Tone</th></tr>
              <tr><td>146.940</td><td>146.340</td><td><a href="/db/sid/77">W9XYZ</a></td><td>Hilltop</td><td></td></tr>
              <tr><td>147.180</td><td>147.780</td><td><a href="/db/sid/78">K9ABC</a></td><td>Tower</td><td>100.0</td></tr>
            </table></body></html>"#;
        let source = source_with(&[
            ("https://rr.test/db/browse/ctid/27/ham", listing),
            ("https://rr.test/db/sid/77", "<html><body><p>CTCSS: 114.8 Mode: FM</p></body></html>"),
        ]);
        let options = ScrapeConfig {
            fetch_details: true,
            ..ScrapeConfig::default()
        };
        let pipeline = pipeline_with(source.clone(), options);

        let outcome = pipeline
            .scrape(&ScrapeRequest {
                targets: vec![Target::Ctid(27)],
                bands: vec![Band::TwoMeter],
            })
            .await
            .unwrap();

        let record = |name: &str| outcome.records.iter().find(|r| r.name == name).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(record("W9XYZ").r_tone_freq, Some(114.8));
        assert_eq!(record("K9ABC").r_tone_freq, Some(100.0));
        assert_eq!(record("K9ABC").duplex, Some(Duplex::Plus));

        let warnings: Vec<(Stage, &str)> = outcome
            .diagnostics
            .warnings()
            .map(|d| (d.stage, d.subject.as_str()))
            .collect();
        assert_eq!(warnings, vec![(Stage::Fetch, "https://rr.test/db/sid/78")]);
        assert_eq!(source.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_shared_subcategory_is_fetched_once() {
        let county = |title: &str| {
            format!(
                r#"<html><head><title>{} Amateur Radio</title></head><body>
                <a href="/db/subcat/5">Repeaters</a> <a href="/db/subcat/5">more</a>
                <table class="rrdbTable"><tr><th>Frequency</th><th>Call</th></tr></table>
                </body></html>"#,
                title
            )
        };
        let cook = county("Cook County, Illinois");
        let lake = county("Lake County, Illinois");
        let subcategory = r#"<table class="rrdbTable">
            <tr><th>Frequency</th><th>Input</th><th>Call</th></tr>
            <tr><td>145.230</td><td>144.630</td><td>W9SUB</td></tr>
            </table>"#;
        let source = source_with(&[
            ("https://rr.test/db/browse/ctid/27/ham", cook.as_str()),
            ("https://rr.test/db/browse/ctid/28/ham", lake.as_str()),
            ("https://rr.test/db/subcat/5", subcategory),
        ]);
        let options = ScrapeConfig {
            follow_subcategories: true,
            ..ScrapeConfig::default()
        };
        let pipeline = pipeline_with(source.clone(), options);

        let outcome = pipeline
            .scrape(&ScrapeRequest {
                targets: vec![Target::Ctid(27), Target::Ctid(28)],
                bands: vec![Band::TwoMeter],
            })
            .await
            .unwrap();

        assert_eq!(
            source.requests.lock().unwrap().as_slice(),
            [
                "https://rr.test/db/browse/ctid/27/ham",
                "https://rr.test/db/subcat/5",
                "https://rr.test/db/browse/ctid/28/ham",
            ]
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].name, "W9SUB");
        assert_eq!(outcome.records[0].comment, "Cook County, Illinois");
        assert!(outcome.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_band_without_defaults_is_fatal_before_fetching() {
        let source = source_with(&[]);
        let pipeline = pipeline(source.clone());

        let err = pipeline
            .scrape(&ScrapeRequest {
                targets: vec![Target::Ctid(27)],
                bands: vec![Band::Murs],
            })
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(source.requests.lock().unwrap().is_empty());
    }
}
