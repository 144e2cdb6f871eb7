///! Channel records from scrape to CSV
///!
///! ## Main Components
///! - `BandDefaultsStore`: canonical per-band values and fixed channel lists
///! - `ChannelNormalizer`: default fill, duplex policy and deduplication
///! - `exporter`: CHIRP CSV output

pub mod defaults;
pub mod exporter;
pub mod normalizer;

pub use defaults::BandDefaultsStore;
pub use exporter::{CHIRP_HEADER, export, export_to_path, write_csv};
pub use normalizer::{ChannelNormalizer, NormalizePolicy, deduplicate, infer_duplex};
