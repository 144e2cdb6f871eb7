mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use chirp_scrape::config::AppConfig;
use chirp_scrape::module::catalog::{FetcherOptions, HttpFetcher, PageSource};
use chirp_scrape::module::channel::{export_to_path, write_csv};
use chirp_scrape::module::index::{CrawlOptions, IndexCrawler, IndexStore};
use chirp_scrape::module::scrape::{ScrapePipeline, ScrapeRequest};
use chirp_scrape::module::zip::ZipResolver;

use cli::{Cli, Commands};

/// Resolves when the user presses Ctrl-C; never, if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("Ctrl-C handler unavailable, crawl can only stop on its own");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    let _logging_guard = chirp_scrape::logging::init_logging(&config.log_dir, "chirp-scrape", &config.log_level);

    match cli.command {
        Commands::Crawl {
            start_id,
            max_id,
            delay_ms,
            stop_after_misses,
            append,
            concurrency,
            index,
        } => {
            // probes are paced by the crawler itself
            let mut fetcher_options = FetcherOptions::from(&config.catalog);
            fetcher_options.request_delay = Duration::ZERO;
            let fetcher = Arc::new(HttpFetcher::new(fetcher_options)?);

            let store = IndexStore::new(index.unwrap_or_else(|| config.index.path.clone()));
            let crawler = IndexCrawler::new(fetcher, store.clone(), config.catalog.base_url.clone());

            let options = CrawlOptions {
                start_id,
                max_id,
                append,
                delay: Duration::from_millis(delay_ms),
                stop_after_misses,
                concurrency,
            };
            let report = crawler
                .extend_until(&options, interrupted())
                .await
                .with_context(|| format!("Crawl of {} failed", store.path().display()))?;

            println!(
                "{} valid, {} missed, {} errored; last id {}; stopped: {:?}; took {}s",
                report.valid,
                report.missed,
                report.errored,
                report.last_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                report.stop_reason,
                report.elapsed().num_seconds()
            );
        }

        Commands::Resolve {
            zips,
            match_mode,
            no_geocode,
        } => {
            if let Some(mode) = match_mode {
                config.zip.match_mode = mode;
            }
            if no_geocode {
                config.zip.geocode = false;
            }

            let fetcher: Arc<dyn PageSource> = Arc::new(HttpFetcher::from_config(&config.catalog)?);
            let resolver = ZipResolver::from_config(&config, fetcher);

            let mut out = csv::Writer::from_writer(std::io::stdout().lock());
            out.write_record(["zip", "ctid", "source", "title"])?;
            for zip in &zips {
                let location = resolver.resolve(zip).await;
                let ctid = location.ctid.map(|c| c.to_string()).unwrap_or_default();
                out.write_record([
                    location.zip.as_str(),
                    ctid.as_str(),
                    location.source.as_str(),
                    location.title.as_deref().unwrap_or_default(),
                ])?;
            }
            out.flush()?;
        }

        Commands::Scrape {
            targets,
            bands,
            output,
            fetch_details,
            follow_subcategories,
            drop_missing_rtone,
            no_infer_duplex,
        } => {
            config.scrape.fetch_details |= fetch_details;
            config.scrape.follow_subcategories |= follow_subcategories;
            config.scrape.drop_missing_rtone |= drop_missing_rtone;
            if no_infer_duplex {
                config.scrape.infer_duplex = false;
            }

            let fetcher: Arc<dyn PageSource> = Arc::new(HttpFetcher::from_config(&config.catalog)?);
            let pipeline = ScrapePipeline::from_config(&config, fetcher, &bands)
                .context("Failed to load band defaults")?;

            let outcome = pipeline
                .scrape(&ScrapeRequest { targets, bands })
                .await
                .context("Scrape failed")?;

            for location in &outcome.locations {
                tracing::info!(
                    "ZIP {} -> {} ({})",
                    location.zip,
                    location.ctid.map(|c| format!("CTID {}", c)).unwrap_or_else(|| "ZIP listing".into()),
                    location.source.as_str()
                );
            }

            match output {
                Some(path) => export_to_path(&outcome.records, &path)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => write_csv(&outcome.records, std::io::stdout().lock())?,
            }

            let warnings = outcome.diagnostics.warnings().count();
            if warnings > 0 {
                eprintln!("{} channel(s) written with {} warning(s):", outcome.records.len(), warnings);
                for event in outcome.diagnostics.warnings() {
                    eprintln!("  {}", event);
                }
            }
        }
    }

    Ok(())
}
