use chirp_common::Band;
use chirp_scrape::module::scrape::Target;
use chirp_scrape::module::zip::MatchMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Build CHIRP channel lists from the RadioReference catalog
#[derive(Parser, Debug)]
#[command(name = "chirp-scrape")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file; built-in defaults are used when it does not exist
    #[arg(short, long, env = "CHIRP_SCRAPE_CONFIG", default_value = "config.toml", global = true)]
    pub config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or extend the CTID index
    Crawl {
        /// First CTID to probe when not appending
        #[arg(long)]
        start_id: u32,

        /// Last CTID to probe
        #[arg(long)]
        max_id: u32,

        /// Milliseconds between probes
        #[arg(long)]
        delay_ms: u64,

        /// Stop after this many invalid CTIDs in a row (0 = never).
        ///
        /// With --append the misses already at the end of the index count
        /// toward this limit, so an index that stopped on N misses only grows
        /// again when rerun with a value above N.
        #[arg(long)]
        stop_after_misses: u32,

        /// Resume after the highest CTID already in the index. Without it the
        /// crawl restarts at --start-id and appends corrected lines; earlier
        /// lines are kept.
        #[arg(long)]
        append: bool,

        /// Probes in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Index file (overrides `index.path`)
        #[arg(long)]
        index: Option<PathBuf>,
    },

    /// Map ZIP codes to CTIDs
    Resolve {
        #[arg(required = true)]
        zips: Vec<String>,

        #[arg(long, value_enum)]
        match_mode: Option<MatchMode>,

        /// Do not fall back to geocoding
        #[arg(long)]
        no_geocode: bool,
    },

    /// Scrape channels and write a CHIRP CSV
    Scrape {
        /// ZIP codes, `ctid:<id>` or catalog URLs
        #[arg(required = true)]
        targets: Vec<Target>,

        /// Bands in output order, e.g. `2m,70cm,NOAA`
        #[arg(short, long, value_delimiter = ',', required = true)]
        bands: Vec<Band>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fetch per-repeater detail pages
        #[arg(long)]
        fetch_details: bool,

        /// Also scrape linked subcategory pages
        #[arg(long)]
        follow_subcategories: bool,

        /// Drop channels that have no receive tone after default fill
        #[arg(long)]
        drop_missing_rtone: bool,

        /// Leave the duplex of repeaters without one empty
        #[arg(long)]
        no_infer_duplex: bool,
    },
}
