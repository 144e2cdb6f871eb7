use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chirp_common::Band;
use serde::{Deserialize, Serialize};

use crate::error::{ChirpError, Result};
use crate::module::zip::MatchMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub zip: ZipConfig,

    #[serde(default)]
    pub bands: BandsConfig,

    #[serde(default)]
    pub scrape: ScrapeConfig,
}

/// Transport settings for the external catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * retry_delay_ms`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Minimum spacing between scrape requests
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZipConfig {
    #[serde(default = "default_zip_reference_path")]
    pub reference_path: PathBuf,

    #[serde(default)]
    pub match_mode: MatchMode,

    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    #[serde(default = "default_true")]
    pub geocode: bool,

    /// Consult the catalog's ZIP pages and site search for ZIP codes the
    /// index cannot place
    #[serde(default = "default_true")]
    pub catalog_lookup: bool,

    #[serde(default = "default_zippopotam_url")]
    pub zippopotam_url: String,

    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandsConfig {
    #[serde(default = "default_defaults_dir")]
    pub defaults_dir: PathBuf,

    /// Band label to table file name, relative to `defaults_dir`
    #[serde(default = "default_band_tables")]
    pub tables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default)]
    pub fetch_details: bool,

    #[serde(default)]
    pub follow_subcategories: bool,

    #[serde(default)]
    pub drop_missing_rtone: bool,

    #[serde(default = "default_true")]
    pub infer_duplex: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_base_url() -> String {
    "https://www.radioreference.com".to_string()
}

fn default_user_agent() -> String {
    "chirp-scrape/0.1 (+https://github.com/chirp-scrape)".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_index_path() -> PathBuf {
    PathBuf::from("data/radioref_index.csv")
}

fn default_zip_reference_path() -> PathBuf {
    PathBuf::from("data/zip_titles.csv")
}

fn default_fuzzy_threshold() -> f64 {
    0.92
}

fn default_true() -> bool {
    true
}

fn default_zippopotam_url() -> String {
    "https://api.zippopotam.us".to_string()
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_defaults_dir() -> PathBuf {
    PathBuf::from("data/bands")
}

fn default_band_tables() -> BTreeMap<String, String> {
    Band::ALL
        .iter()
        .map(|band| (band.as_str().to_string(), format!("{}.csv", table_stem(*band))))
        .collect()
}

fn table_stem(band: Band) -> &'static str {
    match band {
        Band::SixMeter => "6m",
        Band::TwoMeter => "2m",
        Band::OneTwentyFive => "1_25m",
        Band::SeventyCm => "70cm",
        Band::ThirtyThreeCm => "33cm",
        Band::Noaa => "noaa",
        Band::Murs => "murs",
        Band::FrsGmrs => "frs_gmrs",
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            catalog: CatalogConfig::default(),
            index: IndexConfig::default(),
            zip: ZipConfig::default(),
            bands: BandsConfig::default(),
            scrape: ScrapeConfig::default(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { path: default_index_path() }
    }
}

impl Default for ZipConfig {
    fn default() -> Self {
        Self {
            reference_path: default_zip_reference_path(),
            match_mode: MatchMode::default(),
            fuzzy_threshold: default_fuzzy_threshold(),
            geocode: true,
            catalog_lookup: true,
            zippopotam_url: default_zippopotam_url(),
            nominatim_url: default_nominatim_url(),
        }
    }
}

impl Default for BandsConfig {
    fn default() -> Self {
        Self {
            defaults_dir: default_defaults_dir(),
            tables: default_band_tables(),
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            fetch_details: false,
            follow_subcategories: false,
            drop_missing_rtone: false,
            infer_duplex: true,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| ChirpError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` if it exists, built-in defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.max_attempts == 0 {
            return Err(ChirpError::Config("catalog.max_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.zip.fuzzy_threshold) {
            return Err(ChirpError::Config(format!(
                "zip.fuzzy_threshold must be within 0.0..=1.0, got {}",
                self.zip.fuzzy_threshold
            )));
        }
        for label in self.bands.tables.keys() {
            label
                .parse::<Band>()
                .map_err(|e| ChirpError::Config(format!("bands.tables: {}", e)))?;
        }
        Ok(())
    }

    /// Resolved path of the defaults table for a band, if one is configured.
    pub fn band_table_path(&self, band: Band) -> Option<PathBuf> {
        self.bands
            .tables
            .iter()
            .find(|(label, _)| label.parse::<Band>().ok() == Some(band))
            .map(|(_, file)| self.bands.defaults_dir.join(file))
    }
}
