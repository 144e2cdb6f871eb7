use serde::{Deserialize, Serialize};

/// Radio bands a scrape can select.
///
/// Repeater bands are filled from catalog listings; fixed-channel bands come
/// from the canonical channel tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "6m")]
    SixMeter,
    #[serde(rename = "2m")]
    TwoMeter,
    #[serde(rename = "1.25m")]
    OneTwentyFive,
    #[serde(rename = "70cm")]
    SeventyCm,
    #[serde(rename = "33cm")]
    ThirtyThreeCm,
    #[serde(rename = "NOAA")]
    Noaa,
    #[serde(rename = "MURS")]
    Murs,
    #[serde(rename = "FRS/GMRS")]
    FrsGmrs,
}

impl Band {
    pub const ALL: [Band; 8] = [
        Band::SeventyCm,
        Band::TwoMeter,
        Band::Noaa,
        Band::Murs,
        Band::FrsGmrs,
        Band::OneTwentyFive,
        Band::SixMeter,
        Band::ThirtyThreeCm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::SixMeter => "6m",
            Band::TwoMeter => "2m",
            Band::OneTwentyFive => "1.25m",
            Band::SeventyCm => "70cm",
            Band::ThirtyThreeCm => "33cm",
            Band::Noaa => "NOAA",
            Band::Murs => "MURS",
            Band::FrsGmrs => "FRS/GMRS",
        }
    }

    /// Inclusive frequency range in MHz.
    pub fn range_mhz(&self) -> (f64, f64) {
        match self {
            Band::SixMeter => (50.0, 54.0),
            Band::TwoMeter => (144.0, 148.0),
            Band::OneTwentyFive => (222.0, 225.0),
            Band::SeventyCm => (420.0, 450.0),
            Band::ThirtyThreeCm => (902.0, 928.0),
            Band::Noaa => (162.4, 162.55),
            Band::Murs => (151.82, 154.6),
            Band::FrsGmrs => (462.0, 467.725),
        }
    }

    pub fn contains(&self, frequency_mhz: f64) -> bool {
        let (lo, hi) = self.range_mhz();
        // half a hertz of slack for values parsed from text
        lo - 5e-7 <= frequency_mhz && frequency_mhz <= hi + 5e-7
    }

    /// Bands whose channels come from a fixed table rather than the catalog.
    pub fn is_fixed_channel(&self) -> bool {
        matches!(self, Band::Noaa | Band::Murs | Band::FrsGmrs)
    }

    /// Amateur bands where repeaters use a split (duplex) frequency.
    pub fn is_repeater_band(&self) -> bool {
        !self.is_fixed_channel()
    }

    /// First band (in `candidates` order) containing the frequency.
    pub fn classify(frequency_mhz: f64, candidates: &[Band]) -> Option<Band> {
        candidates.iter().copied().find(|b| b.contains(frequency_mhz))
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Band {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "6m" => Ok(Band::SixMeter),
            "2m" => Ok(Band::TwoMeter),
            "1.25m" | "125cm" | "220" => Ok(Band::OneTwentyFive),
            "70cm" => Ok(Band::SeventyCm),
            "33cm" => Ok(Band::ThirtyThreeCm),
            "noaa" => Ok(Band::Noaa),
            "murs" => Ok(Band::Murs),
            "frs/gmrs" | "frs" | "gmrs" | "frs-gmrs" => Ok(Band::FrsGmrs),
            _ => Err(format!("Unknown band: {}", s)),
        }
    }
}

/// Repeater offset direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Duplex {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
    #[default]
    #[serde(rename = "")]
    Simplex,
}

impl Duplex {
    pub fn as_symbol(&self) -> &'static str {
        match self {
            Duplex::Plus => "+",
            Duplex::Minus => "-",
            Duplex::Simplex => "",
        }
    }

    /// Accepts symbols and the textual forms seen on catalog pages.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "+" | "plus" | "positive" | "pos" => Some(Duplex::Plus),
            "-" | "minus" | "negative" | "neg" => Some(Duplex::Minus),
            "" | "simplex" | "off" | "none" => Some(Duplex::Simplex),
            _ => None,
        }
    }
}

impl std::fmt::Display for Duplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

/// CHIRP squelch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToneMode {
    Tone,
    #[serde(rename = "TSQL")]
    Tsql,
    #[serde(rename = "DTCS")]
    Dtcs,
}

impl ToneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToneMode::Tone => "Tone",
            ToneMode::Tsql => "TSQL",
            ToneMode::Dtcs => "DTCS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tone" => Some(ToneMode::Tone),
            "tsql" => Some(ToneMode::Tsql),
            "dtcs" | "dcs" => Some(ToneMode::Dtcs),
            _ => None,
        }
    }
}

/// DCS transmit/receive polarity pair, e.g. `NN` (normal/normal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DtcsPolarity {
    #[default]
    NN,
    NR,
    RN,
    RR,
}

impl DtcsPolarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DtcsPolarity::NN => "NN",
            DtcsPolarity::NR => "NR",
            DtcsPolarity::RN => "RN",
            DtcsPolarity::RR => "RR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "nn" | "n" | "normal" => Some(DtcsPolarity::NN),
            "nr" => Some(DtcsPolarity::NR),
            "rn" => Some(DtcsPolarity::RN),
            "rr" | "r" | "i" | "inverted" | "reverse" | "reversed" => Some(DtcsPolarity::RR),
            _ => None,
        }
    }
}

/// One channel as it flows from the page parser to the exporter.
///
/// Everything except the frequency may be absent on a freshly scraped row;
/// the normalizer completes the tone and DCS fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChannelRecord {
    pub name: String,
    pub frequency_mhz: f64,
    pub mode: Option<String>,
    pub duplex: Option<Duplex>,
    pub offset_mhz: Option<f64>,
    pub tone_mode: Option<ToneMode>,
    pub r_tone_freq: Option<f64>,
    pub c_tone_freq: Option<f64>,
    pub dtcs_code: Option<u16>,
    pub dtcs_polarity: Option<DtcsPolarity>,
    pub band: Option<Band>,
    pub skip: bool,
    pub comment: String,
    /// Catalog page with per-repeater details, if the listing linked one
    #[serde(skip)]
    pub detail_url: Option<String>,
}

impl ChannelRecord {
    pub fn new(name: impl Into<String>, frequency_mhz: f64) -> Self {
        Self {
            name: name.into(),
            frequency_mhz,
            ..Default::default()
        }
    }

    /// Frequency rounded to whole hertz, used as an identity key.
    pub fn frequency_hz(&self) -> u64 {
        mhz_to_hz(self.frequency_mhz)
    }
}

pub fn mhz_to_hz(mhz: f64) -> u64 {
    (mhz * 1_000_000.0).round().max(0.0) as u64
}

/// Result of probing one catalog id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeStatus {
    /// The page names a jurisdiction
    Valid,
    /// The catalog answered, but the slot is empty
    Miss,
    /// Every attempt to fetch the page failed
    Error,
}

impl ProbeStatus {
    pub fn as_flag(&self) -> &'static str {
        match self {
            ProbeStatus::Valid => "true",
            ProbeStatus::Miss => "false",
            ProbeStatus::Error => "error",
        }
    }

    pub fn from_flag(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "valid" => Some(ProbeStatus::Valid),
            "false" | "0" | "miss" => Some(ProbeStatus::Miss),
            "error" => Some(ProbeStatus::Error),
            _ => None,
        }
    }
}

/// A line of the persisted catalog index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: u32,
    pub title: String,
    pub status: ProbeStatus,
}

impl IndexEntry {
    pub fn valid(id: u32, title: impl Into<String>) -> Self {
        Self { id, title: title.into(), status: ProbeStatus::Valid }
    }

    pub fn miss(id: u32) -> Self {
        Self { id, title: String::new(), status: ProbeStatus::Miss }
    }

    pub fn error(id: u32) -> Self {
        Self { id, title: String::new(), status: ProbeStatus::Error }
    }

    pub fn is_valid(&self) -> bool {
        self.status == ProbeStatus::Valid
    }
}

/// How a ZIP code was (or was not) mapped to a catalog id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionSource {
    #[serde(rename = "index")]
    Index,
    #[serde(rename = "geocode-fallback")]
    GeocodeFallback,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Index => "index",
            ResolutionSource::GeocodeFallback => "geocode-fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub zip: String,
    pub ctid: Option<u32>,
    pub source: ResolutionSource,
    /// Index title the ZIP matched
    pub title: Option<String>,
}

/// Frequency column of a defaults table row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DefaultFrequency {
    /// Applies to one channel
    Channel(f64),
    /// Applies to every channel of the band without a row of its own
    BandWide,
}

/// Canonical values for a band (or one of its channels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandDefault {
    pub band: Band,
    pub frequency: DefaultFrequency,
    pub r_tone_freq: Option<f64>,
    pub c_tone_freq: Option<f64>,
    pub dtcs_code: Option<u16>,
    pub dtcs_polarity: Option<DtcsPolarity>,
    pub name: Option<String>,
    pub duplex: Option<Duplex>,
    pub offset_mhz: Option<f64>,
    pub mode: Option<String>,
    pub comment: Option<String>,
}

impl BandDefault {
    pub fn band_wide(band: Band) -> Self {
        Self {
            band,
            frequency: DefaultFrequency::BandWide,
            r_tone_freq: None,
            c_tone_freq: None,
            dtcs_code: None,
            dtcs_polarity: None,
            name: None,
            duplex: None,
            offset_mhz: None,
            mode: None,
            comment: None,
        }
    }

    pub fn channel_hz(&self) -> Option<u64> {
        match self.frequency {
            DefaultFrequency::Channel(mhz) => Some(mhz_to_hz(mhz)),
            DefaultFrequency::BandWide => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_labels_round_trip() {
        for band in Band::ALL {
            assert_eq!(band.as_str().parse::<Band>().unwrap(), band);
        }
        assert!("10m".parse::<Band>().is_err());
    }

    #[test]
    fn test_band_serde_uses_labels() {
        let json = serde_json::to_string(&Band::FrsGmrs).unwrap();
        assert_eq!(json, "\"FRS/GMRS\"");
    }

    #[test]
    fn test_classify_respects_selection_order() {
        assert_eq!(Band::classify(146.94, &Band::ALL), Some(Band::TwoMeter));
        assert_eq!(Band::classify(462.5625, &Band::ALL), Some(Band::FrsGmrs));
        assert_eq!(Band::classify(162.55, &[Band::Noaa]), Some(Band::Noaa));
        assert_eq!(Band::classify(146.94, &[Band::SeventyCm]), None);
    }

    #[test]
    fn test_duplex_textual_forms() {
        assert_eq!(Duplex::parse("positive"), Some(Duplex::Plus));
        assert_eq!(Duplex::parse("Minus"), Some(Duplex::Minus));
        assert_eq!(Duplex::parse(""), Some(Duplex::Simplex));
        assert_eq!(Duplex::parse("split"), None);
    }

    #[test]
    fn test_status_flags() {
        for status in [ProbeStatus::Valid, ProbeStatus::Miss, ProbeStatus::Error] {
            assert_eq!(ProbeStatus::from_flag(status.as_flag()), Some(status));
        }
    }

    #[test]
    fn test_frequency_hz_rounding() {
        assert_eq!(ChannelRecord::new("a", 146.94).frequency_hz(), 146_940_000);
        assert_eq!(mhz_to_hz(462.5625), 462_562_500);
    }
}
