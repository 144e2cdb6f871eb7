///! Band defaults store
///!
///! Canonical per-band values read from the shipped CSV tables. A row whose
///! frequency is `*` covers the whole band; other rows describe one channel
///! (the NOAA, MURS and FRS/GMRS tables list every channel of the band).

use chirp_common::{Band, BandDefault, ChannelRecord, DefaultFrequency, DtcsPolarity, Duplex};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::{ChirpError, Result};

#[derive(Debug, Deserialize)]
struct DefaultsRow {
    #[serde(rename = "Frequency")]
    frequency: String,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Duplex", default)]
    duplex: Option<String>,
    #[serde(rename = "Offset", default)]
    offset: Option<String>,
    #[serde(rename = "rToneFreq", default)]
    r_tone_freq: Option<String>,
    #[serde(rename = "cToneFreq", default)]
    c_tone_freq: Option<String>,
    #[serde(rename = "DtcsCode", default)]
    dtcs_code: Option<String>,
    #[serde(rename = "DtcsPolarity", default)]
    dtcs_polarity: Option<String>,
    #[serde(rename = "Mode", default)]
    mode: Option<String>,
    #[serde(rename = "Comment", default)]
    comment: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(value: &Option<String>, column: &str) -> std::result::Result<Option<T>, String> {
    match present(value) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("bad {} '{}'", column, v)),
    }
}

impl DefaultsRow {
    fn into_default(self, band: Band) -> std::result::Result<BandDefault, String> {
        let frequency = match self.frequency.trim() {
            "*" => DefaultFrequency::BandWide,
            text => {
                let mhz = text
                    .parse::<f64>()
                    .map_err(|_| format!("bad Frequency '{}'", text))?;
                if !band.contains(mhz) {
                    return Err(format!("{} MHz is outside the {} band", mhz, band));
                }
                DefaultFrequency::Channel(mhz)
            }
        };

        let duplex = match present(&self.duplex) {
            None => None,
            Some(text) => Some(Duplex::parse(text).ok_or_else(|| format!("bad Duplex '{}'", text))?),
        };
        let dtcs_polarity = match present(&self.dtcs_polarity) {
            None => None,
            Some(text) => Some(
                DtcsPolarity::parse(text).ok_or_else(|| format!("bad DtcsPolarity '{}'", text))?,
            ),
        };

        Ok(BandDefault {
            band,
            frequency,
            r_tone_freq: parse_number(&self.r_tone_freq, "rToneFreq")?,
            c_tone_freq: parse_number(&self.c_tone_freq, "cToneFreq")?,
            dtcs_code: parse_number(&self.dtcs_code, "DtcsCode")?,
            dtcs_polarity,
            name: present(&self.name).map(str::to_string),
            duplex,
            offset_mhz: parse_number(&self.offset, "Offset")?,
            mode: present(&self.mode).map(str::to_string),
            comment: present(&self.comment).map(str::to_string),
        })
    }
}

/// Immutable band -> defaults mapping, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct BandDefaultsStore {
    tables: BTreeMap<Band, Vec<BandDefault>>,
}

impl BandDefaultsStore {
    /// Loads the configured table of every band in `bands`.
    ///
    /// Fails with [`ChirpError::MissingDefaults`] as soon as one is not
    /// configured or not on disk.
    pub fn load(config: &AppConfig, bands: &[Band]) -> Result<Self> {
        let mut store = Self::default();
        for band in bands {
            if store.tables.contains_key(band) {
                continue;
            }
            let path = config
                .band_table_path(*band)
                .ok_or_else(|| ChirpError::MissingDefaults {
                    band: *band,
                    path: config.bands.defaults_dir.clone(),
                })?;
            let table = load_table(*band, &path)?;
            store.tables.insert(*band, table);
        }
        Ok(store)
    }

    pub fn load_all(config: &AppConfig) -> Result<Self> {
        Self::load(config, &Band::ALL)
    }

    pub fn from_tables(tables: impl IntoIterator<Item = (Band, Vec<BandDefault>)>) -> Self {
        Self {
            tables: tables.into_iter().collect(),
        }
    }

    pub fn bands(&self) -> impl Iterator<Item = Band> + '_ {
        self.tables.keys().copied()
    }

    pub fn table(&self, band: Band) -> &[BandDefault] {
        self.tables.get(&band).map(Vec::as_slice).unwrap_or_default()
    }

    /// The channel's own row when the table has one, else the band-wide row.
    pub fn defaults_for(&self, band: Band, frequency_mhz: f64) -> Option<&BandDefault> {
        let table = self.table(band);
        let hz = chirp_common::mhz_to_hz(frequency_mhz);
        table
            .iter()
            .find(|row| row.channel_hz() == Some(hz))
            .or_else(|| table.iter().find(|row| row.frequency == DefaultFrequency::BandWide))
    }

    /// Channels of a fixed-channel band, in table order. Empty for repeater bands.
    pub fn fixed_channels(&self, band: Band) -> Vec<ChannelRecord> {
        if !band.is_fixed_channel() {
            return Vec::new();
        }

        self.table(band)
            .iter()
            .filter_map(|row| match row.frequency {
                DefaultFrequency::Channel(mhz) => Some((row, mhz)),
                DefaultFrequency::BandWide => None,
            })
            .map(|(row, mhz)| {
                let mut record = ChannelRecord::new(
                    row.name.clone().unwrap_or_else(|| format!("{} {:.4}", band, mhz)),
                    mhz,
                );
                record.band = Some(band);
                record.duplex = row.duplex;
                record.offset_mhz = row.offset_mhz;
                record.mode = row.mode.clone();
                record.comment = row.comment.clone().unwrap_or_default();
                record
            })
            .collect()
    }
}

fn load_table(band: Band, path: &Path) -> Result<Vec<BandDefault>> {
    if !path.is_file() {
        return Err(ChirpError::MissingDefaults {
            band,
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path)?;
    let table = parse_table(band, &content).map_err(|reason| ChirpError::InvalidDefaults {
        path: path.to_path_buf(),
        reason,
    })?;
    tracing::debug!("Loaded {} default rows for {} from {}", table.len(), band, path.display());
    Ok(table)
}

fn parse_table(band: Band, content: &str) -> std::result::Result<Vec<BandDefault>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers = reader.headers().map_err(|e| e.to_string())?;
    if !headers.iter().any(|h| h == "Frequency") {
        return Err("no Frequency column".to_string());
    }

    let mut rows = Vec::new();
    for (i, result) in reader.deserialize::<DefaultsRow>().enumerate() {
        let row_number = i + 2;
        match result {
            Ok(row) => match row.into_default(band) {
                Ok(default) => rows.push(default),
                Err(e) => tracing::warn!("Skipping {} defaults row {}: {}", band, row_number, e),
            },
            Err(e) => tracing::warn!("Error parsing {} defaults row {}: {}", band, row_number, e),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TWO_METER: &str = "\
Frequency,rToneFreq,cToneFreq,DtcsCode,DtcsPolarity,Duplex,Offset,Mode
*,88.5,88.5,023,NN,,0.600,FM
146.520,,,,,,,FM
147.000,100.0,100.0,,,+,0.600,
";

    const NOAA: &str = "\
Frequency,Name,Mode,Comment
162.400,WX1,FM,NOAA Weather
162.425,WX2,FM,NOAA Weather
";

    fn config_with(dir: &TempDir, files: &[(&str, &str, &str)]) -> AppConfig {
        let mut config = AppConfig::default();
        config.bands.defaults_dir = dir.path().to_path_buf();
        config.bands.tables.clear();
        for (label, file, content) in files {
            std::fs::write(dir.path().join(file), content).unwrap();
            config.bands.tables.insert(label.to_string(), file.to_string());
        }
        config
    }

    #[test]
    fn test_channel_row_beats_band_wide_row() {
        let dir = TempDir::new().unwrap();
        let config = config_with(&dir, &[("2m", "2m.csv", TWO_METER)]);
        let store = BandDefaultsStore::load(&config, &[Band::TwoMeter]).unwrap();

        let wide = store.defaults_for(Band::TwoMeter, 146.94).unwrap();
        assert_eq!(wide.frequency, DefaultFrequency::BandWide);
        assert_eq!(wide.r_tone_freq, Some(88.5));
        assert_eq!(wide.dtcs_code, Some(23));
        assert_eq!(wide.offset_mhz, Some(0.6));

        let own = store.defaults_for(Band::TwoMeter, 147.0).unwrap();
        assert_eq!(own.r_tone_freq, Some(100.0));
        assert_eq!(own.duplex, Some(Duplex::Plus));

        assert!(store.defaults_for(Band::SeventyCm, 446.0).is_none());
    }

    #[test]
    fn test_missing_table_fails_fast() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with(&dir, &[("2m", "2m.csv", TWO_METER)]);
        config.bands.tables.insert("70cm".into(), "absent.csv".into());

        let err = BandDefaultsStore::load(&config, &[Band::TwoMeter, Band::SeventyCm]).unwrap_err();
        assert!(matches!(err, ChirpError::MissingDefaults { band: Band::SeventyCm, .. }));

        let err = BandDefaultsStore::load(&config, &[Band::Murs]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_table_without_frequency_column_is_invalid() {
        let dir = TempDir::new().unwrap();
        let config = config_with(&dir, &[("2m", "2m.csv", "Name,Tone\nx,1\n")]);
        let err = BandDefaultsStore::load(&config, &[Band::TwoMeter]).unwrap_err();
        assert!(matches!(err, ChirpError::InvalidDefaults { .. }));
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let rows = parse_table(
            Band::TwoMeter,
            "Frequency,rToneFreq\n146.0,abc\n99.0,\n*,100.0\n",
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].frequency, DefaultFrequency::BandWide);
    }

    #[test]
    fn test_fixed_channels() {
        let dir = TempDir::new().unwrap();
        let config = config_with(&dir, &[("NOAA", "noaa.csv", NOAA), ("2m", "2m.csv", TWO_METER)]);
        let store = BandDefaultsStore::load(&config, &[Band::Noaa, Band::TwoMeter]).unwrap();

        let channels = store.fixed_channels(Band::Noaa);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name, "WX1");
        assert_eq!(channels[0].band, Some(Band::Noaa));
        assert_eq!(channels[1].comment, "NOAA Weather");

        assert!(store.fixed_channels(Band::TwoMeter).is_empty());
    }
}
