///! Channel normalizer
///!
///! Reconciles scraped records with the band defaults. Deterministic and
///! total: every input either comes out complete or is dropped by policy.

use chirp_common::{Band, ChannelRecord, DtcsPolarity, Duplex, ToneMode};
use std::collections::HashMap;

use super::defaults::BandDefaultsStore;

/// 2m repeaters below this frequency conventionally use a negative offset
const TWO_METER_SPLIT_MHZ: f64 = 147.0;

const DEFAULT_MODE: &str = "FM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizePolicy {
    /// Drop records that still have no receive tone after default fill
    pub drop_missing_rtone: bool,
    /// Guess the offset direction of repeater-band records that have none
    pub infer_duplex: bool,
}

impl Default for NormalizePolicy {
    fn default() -> Self {
        Self {
            drop_missing_rtone: false,
            infer_duplex: true,
        }
    }
}

pub struct ChannelNormalizer<'a> {
    defaults: &'a BandDefaultsStore,
    policy: NormalizePolicy,
}

/// Identity of a record: frequency at 1 Hz resolution plus name
fn dedup_key(record: &ChannelRecord) -> (u64, String) {
    (record.frequency_hz(), record.name.clone())
}

/// Fills absent fields of `first` from a later duplicate.
fn merge_missing(first: &mut ChannelRecord, later: ChannelRecord) {
    first.mode = first.mode.take().or(later.mode);
    first.duplex = first.duplex.or(later.duplex);
    first.offset_mhz = first.offset_mhz.or(later.offset_mhz);
    first.tone_mode = first.tone_mode.or(later.tone_mode);
    first.r_tone_freq = first.r_tone_freq.or(later.r_tone_freq);
    first.c_tone_freq = first.c_tone_freq.or(later.c_tone_freq);
    first.dtcs_code = first.dtcs_code.or(later.dtcs_code);
    first.dtcs_polarity = first.dtcs_polarity.or(later.dtcs_polarity);
    first.band = first.band.or(later.band);
    first.detail_url = first.detail_url.take().or(later.detail_url);
    if first.comment.is_empty() {
        first.comment = later.comment;
    }
}

/// Groups records by identity, keeping the first occurrence's position.
pub fn deduplicate(records: Vec<ChannelRecord>) -> Vec<ChannelRecord> {
    let mut out: Vec<ChannelRecord> = Vec::with_capacity(records.len());
    let mut seen: HashMap<(u64, String), usize> = HashMap::new();

    for record in records {
        let key = dedup_key(&record);
        match seen.get(&key) {
            Some(&i) => merge_missing(&mut out[i], record),
            None => {
                seen.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Offset direction a repeater on `band` most likely uses.
pub fn infer_duplex(band: Band, frequency_mhz: f64) -> Duplex {
    match band {
        Band::TwoMeter if frequency_mhz < TWO_METER_SPLIT_MHZ => Duplex::Minus,
        _ => Duplex::Plus,
    }
}

impl<'a> ChannelNormalizer<'a> {
    pub fn new(defaults: &'a BandDefaultsStore, policy: NormalizePolicy) -> Self {
        Self { defaults, policy }
    }

    /// Normalizes `records`; a record without a band tag is treated as `band`.
    /// Survivors keep their input order.
    pub fn normalize(&self, records: Vec<ChannelRecord>, band: Band) -> Vec<ChannelRecord> {
        let total = records.len();
        let out: Vec<ChannelRecord> = deduplicate(records)
            .into_iter()
            .filter_map(|record| self.complete(record, band))
            .collect();

        tracing::debug!("Normalized {} {} records into {}", total, band, out.len());
        out
    }

    fn complete(&self, mut record: ChannelRecord, band: Band) -> Option<ChannelRecord> {
        let band = *record.band.get_or_insert(band);

        // Squelch only switches on for tones the page actually listed
        if record.tone_mode.is_none() {
            record.tone_mode = if record.r_tone_freq.is_some() {
                Some(ToneMode::Tone)
            } else if record.dtcs_code.is_some() {
                Some(ToneMode::Dtcs)
            } else {
                None
            };
        }

        let defaults = self.defaults.defaults_for(band, record.frequency_mhz);

        if let Some(d) = defaults {
            record.r_tone_freq = record.r_tone_freq.or(d.r_tone_freq);
            record.c_tone_freq = record.c_tone_freq.or(d.c_tone_freq);
            record.dtcs_code = record.dtcs_code.or(d.dtcs_code);
            record.dtcs_polarity = record.dtcs_polarity.or(d.dtcs_polarity);
            record.duplex = record.duplex.or(d.duplex);
            if record.mode.is_none() {
                record.mode = d.mode.clone();
            }
            if record.comment.is_empty() {
                if let Some(comment) = &d.comment {
                    record.comment = comment.clone();
                }
            }
        }

        if record.dtcs_code.is_some() && record.dtcs_polarity.is_none() {
            record.dtcs_polarity = Some(DtcsPolarity::NN);
        }

        let duplex = match record.duplex {
            Some(duplex) => duplex,
            None if self.policy.infer_duplex && band.is_repeater_band() => {
                infer_duplex(band, record.frequency_mhz)
            }
            None => Duplex::Simplex,
        };
        record.duplex = Some(duplex);

        if duplex == Duplex::Simplex {
            record.offset_mhz = None;
        } else if record.offset_mhz.is_none() {
            record.offset_mhz = defaults.and_then(|d| d.offset_mhz);
        }

        if self.policy.drop_missing_rtone && record.r_tone_freq.is_none() {
            tracing::debug!("Dropping {} {:.6}: no receive tone", record.name, record.frequency_mhz);
            return None;
        }

        if record.mode.is_none() {
            record.mode = Some(DEFAULT_MODE.to_string());
        }

        Some(record)
    }
}
