///! CHIRP CSV export
///!
///! The column set and order are a compatibility contract with CHIRP's CSV
///! import and never change.

use chirp_common::ChannelRecord;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

pub const CHIRP_HEADER: [&str; 13] = [
    "Name",
    "Frequency",
    "Duplex",
    "Offset",
    "Tone",
    "rToneFreq",
    "cToneFreq",
    "DtcsCode",
    "DtcsPolarity",
    "Mode",
    "TStep",
    "Skip",
    "Comment",
];

const TUNING_STEP_KHZ: &str = "5.00";

fn mhz(value: Option<f64>) -> String {
    value.map(|v| format!("{:.6}", v)).unwrap_or_default()
}

fn tone(value: Option<f64>) -> String {
    value.map(|v| format!("{:.1}", v)).unwrap_or_default()
}

fn to_row(record: &ChannelRecord) -> [String; 13] {
    [
        record.name.clone(),
        format!("{:.6}", record.frequency_mhz),
        record.duplex.map(|d| d.as_symbol().to_string()).unwrap_or_default(),
        mhz(record.offset_mhz),
        record.tone_mode.map(|t| t.as_str().to_string()).unwrap_or_default(),
        tone(record.r_tone_freq),
        tone(record.c_tone_freq),
        record.dtcs_code.map(|c| format!("{:03}", c)).unwrap_or_default(),
        record.dtcs_polarity.map(|p| p.as_str().to_string()).unwrap_or_default(),
        record.mode.clone().unwrap_or_default(),
        TUNING_STEP_KHZ.to_string(),
        if record.skip { "S".to_string() } else { String::new() },
        record.comment.clone(),
    ]
}

/// Writes the header and one row per record.
pub fn write_csv<W: Write>(records: &[ChannelRecord], writer: W) -> Result<()> {
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv.write_record(CHIRP_HEADER)?;
    for record in records {
        csv.write_record(to_row(record))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export(records: &[ChannelRecord]) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(records, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn export_to_path(records: &[ChannelRecord], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    write_csv(records, std::io::BufWriter::new(file))?;
    tracing::info!("Wrote {} channels to {}", records.len(), path.display());
    Ok(())
}
