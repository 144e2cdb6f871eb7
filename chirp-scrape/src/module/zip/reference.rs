use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// Static ZIP code -> place title table (`zip,title` CSV).
#[derive(Debug, Clone, Default)]
pub struct ZipReference {
    titles: HashMap<String, String>,
}

/// Five-digit form of a ZIP or ZIP+4 code, `None` if it is not one.
pub fn normalize_zip(zip: &str) -> Option<String> {
    let zip = zip.trim();
    let base = zip.split_once('-').map(|(base, _)| base).unwrap_or(zip);
    (base.len() == 5 && base.chars().all(|c| c.is_ascii_digit())).then(|| base.to_string())
}

impl ZipReference {
    /// Loads the table; a missing file yields an empty table.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("ZIP reference table {} not found, relying on geocoding", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let reference = Self::parse(&content);
        tracing::info!("Loaded {} ZIP reference titles from {}", reference.len(), path.display());
        Ok(reference)
    }

    pub fn parse(content: &str) -> Self {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut titles = HashMap::new();
        for (line, result) in reader.records().enumerate() {
            match result {
                Ok(record) => {
                    let zip = record.get(0).and_then(normalize_zip);
                    let title = record.get(1).map(str::trim).filter(|t| !t.is_empty());
                    match (zip, title) {
                        (Some(zip), Some(title)) => {
                            titles.insert(zip, title.to_string());
                        }
                        // header
                        _ if line == 0 => {}
                        _ => tracing::warn!("Skipping ZIP reference line {}", line + 1),
                    }
                }
                Err(e) => tracing::warn!("Error parsing ZIP reference line {}: {}", line + 1, e),
            }
        }
        Self { titles }
    }

    pub fn from_pairs<I, Z, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Z, T)>,
        Z: AsRef<str>,
        T: Into<String>,
    {
        Self {
            titles: pairs
                .into_iter()
                .filter_map(|(zip, title)| normalize_zip(zip.as_ref()).map(|z| (z, title.into())))
                .collect(),
        }
    }

    pub fn title_for(&self, zip: &str) -> Option<&str> {
        normalize_zip(zip).and_then(|z| self.titles.get(&z)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}
