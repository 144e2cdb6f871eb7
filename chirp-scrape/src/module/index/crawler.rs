///! Incremental CTID crawler
///!
///! Walks the numeric id space in ascending order and appends one index line
///! per probed id. Probes may run in parallel, but results are consumed and
///! written strictly in id order so the stop heuristic sees the same sequence
///! a serial walk would.

use chirp_common::{IndexEntry, ProbeStatus};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::store::IndexStore;
use crate::diagnostics::{Diagnostics, Stage};
use crate::error::Result;
use crate::module::catalog::urls::ctid_url;
use crate::module::catalog::{Pacer, PageSource, is_jurisdiction_title, parse_title, strip_title_decorations};

/// Caller-supplied crawl scope. None of these have defaults.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub start_id: u32,
    pub max_id: u32,
    /// Resume after the highest id already indexed. Without it the walk
    /// starts at `start_id` and re-probed ids are appended as corrections.
    pub append: bool,
    /// Minimum spacing between probe starts
    pub delay: Duration,
    /// Halt after this many invalid ids in a row; 0 never halts early
    pub stop_after_misses: u32,
    pub concurrency: usize,
}

/// Position of a run in the id space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlState {
    pub next_id: u32,
    pub consecutive_misses: u32,
}

impl CrawlState {
    /// Rebuilds the state from an existing index: the id after the highest
    /// one written, and the length of the trailing run of invalid ids.
    pub fn resume(entries: &[IndexEntry], start_id: u32) -> Self {
        let Some(last) = entries.last() else {
            return Self {
                next_id: start_id,
                consecutive_misses: 0,
            };
        };

        let mut consecutive_misses = 0;
        let mut expected = last.id;
        for entry in entries.iter().rev() {
            if entry.is_valid() || entry.id != expected {
                break;
            }
            consecutive_misses += 1;
            expected = expected.wrapping_sub(1);
        }

        Self {
            next_id: last.id.saturating_add(1),
            consecutive_misses,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Reached `max_id`
    Exhausted,
    /// Hit the consecutive-miss threshold
    MissThreshold,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub first_id: Option<u32>,
    /// Last id written to the index
    pub last_id: Option<u32>,
    pub valid: u32,
    pub missed: u32,
    pub errored: u32,
    pub stop_reason: StopReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub diagnostics: Diagnostics,
}

impl CrawlReport {
    pub fn probed(&self) -> u32 {
        self.valid + self.missed + self.errored
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

pub struct IndexCrawler {
    source: Arc<dyn PageSource>,
    store: IndexStore,
    base_url: String,
}

impl IndexCrawler {
    pub fn new(source: Arc<dyn PageSource>, store: IndexStore, base_url: impl Into<String>) -> Self {
        Self {
            source,
            store,
            base_url: base_url.into(),
        }
    }

    pub async fn extend(&self, options: &CrawlOptions) -> Result<CrawlReport> {
        self.extend_until(options, std::future::pending::<()>()).await
    }

    /// Like [`extend`](Self::extend), stopping cleanly between probes once
    /// `cancel` resolves. Every line written before that is complete.
    pub async fn extend_until(
        &self,
        options: &CrawlOptions,
        cancel: impl Future<Output = ()>,
    ) -> Result<CrawlReport> {
        let started_at = Utc::now();

        let mut state = if options.append {
            let entries = self.store.load()?;
            CrawlState::resume(&entries, options.start_id)
        } else {
            CrawlState {
                next_id: options.start_id,
                consecutive_misses: 0,
            }
        };
        let mut writer = self.store.open_writer()?;

        info!(
            "Crawling CTIDs {}..={} (append: {}, next id: {}, stop after {} misses)",
            options.start_id, options.max_id, options.append, state.next_id, options.stop_after_misses
        );

        let mut report = CrawlReport {
            first_id: None,
            last_id: None,
            valid: 0,
            missed: 0,
            errored: 0,
            stop_reason: StopReason::Exhausted,
            started_at,
            finished_at: started_at,
            diagnostics: Diagnostics::new(),
        };

        let threshold_reached = |misses: u32| options.stop_after_misses > 0 && misses >= options.stop_after_misses;

        if threshold_reached(state.consecutive_misses) {
            info!(
                "Index already ends with {} consecutive misses, nothing to do",
                state.consecutive_misses
            );
            report.stop_reason = StopReason::MissThreshold;
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let pacer = Pacer::new(options.delay);
        let ids = state.next_id..=options.max_id;
        let probes = futures::stream::iter(ids)
            .map(|id| self.probe(id, &pacer))
            .buffered(options.concurrency.max(1));
        tokio::pin!(probes);
        tokio::pin!(cancel);

        loop {
            let entry = tokio::select! {
                biased;
                _ = &mut cancel => {
                    info!("Crawl cancelled before CTID {}", state.next_id);
                    report.stop_reason = StopReason::Cancelled;
                    break;
                }
                next = probes.next() => match next {
                    Some(entry) => entry,
                    None => break,
                },
            };

            writer.append(&entry)?;

            match entry.status {
                ProbeStatus::Valid => {
                    report.valid += 1;
                    state.consecutive_misses = 0;
                }
                ProbeStatus::Miss => {
                    report.missed += 1;
                    state.consecutive_misses += 1;
                }
                ProbeStatus::Error => {
                    report.errored += 1;
                    state.consecutive_misses += 1;
                    report
                        .diagnostics
                        .warn(Stage::Fetch, format!("ctid {}", entry.id), "probe failed after retries");
                }
            }

            report.first_id.get_or_insert(entry.id);
            report.last_id = Some(entry.id);
            state.next_id = entry.id.saturating_add(1);

            if threshold_reached(state.consecutive_misses) {
                info!(
                    "Stopping at CTID {} after {} consecutive misses",
                    entry.id, state.consecutive_misses
                );
                report.stop_reason = StopReason::MissThreshold;
                break;
            }
        }

        report.finished_at = Utc::now();
        info!(
            "Crawl finished: {} valid, {} missed, {} errored ({:?})",
            report.valid, report.missed, report.errored, report.stop_reason
        );
        Ok(report)
    }

    async fn probe(&self, id: u32, pacer: &Pacer) -> IndexEntry {
        pacer.wait().await;
        let url = ctid_url(&self.base_url, id);

        match self.source.fetch(&url).await {
            Ok(page) if page.is_success() => match parse_title(&page.body) {
                Some(title) if is_jurisdiction_title(&title) => {
                    let title = strip_title_decorations(&title);
                    debug!("CTID {} -> {}", id, title);
                    IndexEntry::valid(id, title)
                }
                other => {
                    debug!("CTID {} is not a jurisdiction page ({:?})", id, other);
                    IndexEntry::miss(id)
                }
            },
            Ok(page) => {
                debug!("CTID {} -> HTTP {}", id, page.status);
                IndexEntry::miss(id)
            }
            Err(e) => {
                warn!("Probe of CTID {} failed: {}", id, e);
                IndexEntry::error(id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChirpError;
    use crate::module::catalog::FetchedPage;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Catalog where listed ids are counties, failing ids always error,
    /// and everything else is a 404
    #[derive(Default)]
    struct FakeCatalog {
        counties: HashMap<u32, String>,
        failing: HashSet<u32>,
        requests: Mutex<Vec<u32>>,
    }

    impl FakeCatalog {
        fn with_counties(ids: &[u32]) -> Self {
            Self {
                counties: ids
                    .iter()
                    .map(|id| (*id, format!("County {}, Illinois", id)))
                    .collect(),
                ..Default::default()
            }
        }

        fn requested(&self) -> Vec<u32> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for FakeCatalog {
        async fn fetch(&self, url: &str) -> crate::error::Result<FetchedPage> {
            let id: u32 = url
                .split("/ctid/")
                .nth(1)
                .and_then(|rest| rest.split('/').next())
                .and_then(|id| id.parse().ok())
                .unwrap();
            self.requests.lock().unwrap().push(id);

            if self.failing.contains(&id) {
                return Err(ChirpError::TransientFetch {
                    url: url.to_string(),
                    attempts: 3,
                    message: "HTTP 503".into(),
                });
            }
            Ok(match self.counties.get(&id) {
                Some(title) => FetchedPage {
                    url: url.to_string(),
                    status: 200,
                    body: format!("<html><head><title>{} Amateur Radio - RadioReference</title></head></html>", title),
                },
                None => FetchedPage {
                    url: url.to_string(),
                    status: 404,
                    body: String::new(),
                },
            })
        }
    }

    fn options(start_id: u32, max_id: u32, append: bool, stop_after_misses: u32) -> CrawlOptions {
        CrawlOptions {
            start_id,
            max_id,
            append,
            delay: Duration::ZERO,
            stop_after_misses,
            concurrency: 1,
        }
    }

    fn crawler(catalog: Arc<FakeCatalog>, dir: &TempDir) -> IndexCrawler {
        IndexCrawler::new(catalog, IndexStore::new(dir.path().join("index.csv")), "https://rr.test")
    }

    fn ids(store: &IndexStore) -> Vec<u32> {
        store.load().unwrap().iter().map(|e| e.id).collect()
    }

    #[tokio::test]
    async fn test_stops_after_consecutive_misses() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::with_counties(&[1, 2, 9]));
        let crawler = crawler(catalog, &dir);

        let report = crawler.extend(&options(1, 100, false, 3)).await.unwrap();

        // misses start at 3, so the run halts at 3 + 3 - 1
        assert_eq!(report.last_id, Some(5));
        assert_eq!(report.stop_reason, StopReason::MissThreshold);
        assert_eq!((report.valid, report.missed, report.errored), (2, 3, 0));
        assert_eq!(ids(&crawler.store), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_parallel_fetches_keep_order_and_stop_point() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::with_counties(&[1, 2, 9]));
        let crawler = crawler(catalog.clone(), &dir);

        let mut opts = options(1, 100, false, 3);
        opts.concurrency = 4;
        let report = crawler.extend(&opts).await.unwrap();

        assert_eq!(report.last_id, Some(5));
        assert_eq!(ids(&crawler.store), vec![1, 2, 3, 4, 5]);
        assert!(catalog.requested().len() <= 5 + 4);
    }

    #[tokio::test]
    async fn test_repeated_append_runs_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::with_counties(&[1, 2, 3]));
        let crawler = crawler(catalog, &dir);

        let first = crawler.extend(&options(1, 6, true, 10)).await.unwrap();
        assert_eq!(first.stop_reason, StopReason::Exhausted);
        let content = std::fs::read_to_string(crawler.store.path()).unwrap();

        let second = crawler.extend(&options(1, 6, true, 10)).await.unwrap();
        assert_eq!(second.probed(), 0);
        assert_eq!(std::fs::read_to_string(crawler.store.path()).unwrap(), content);
    }

    #[tokio::test]
    async fn test_append_runs_extend_monotonically() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::with_counties(&[1, 2, 3, 4, 5, 6]));
        let crawler = crawler(catalog.clone(), &dir);

        crawler.extend(&options(1, 3, true, 5)).await.unwrap();
        let report = crawler.extend(&options(1, 6, true, 5)).await.unwrap();

        assert_eq!(report.first_id, Some(4));
        let raw = std::fs::read_to_string(crawler.store.path()).unwrap();
        let raw_ids: Vec<u32> = raw
            .lines()
            .map(|l| l.split(',').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(raw_ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(catalog.requested(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_resume_after_threshold_stop_does_nothing() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::with_counties(&[1]));
        let crawler = crawler(catalog.clone(), &dir);

        crawler.extend(&options(1, 50, true, 2)).await.unwrap();
        let report = crawler.extend(&options(1, 50, true, 2)).await.unwrap();

        assert_eq!(report.probed(), 0);
        assert_eq!(report.stop_reason, StopReason::MissThreshold);
        assert_eq!(catalog.requested(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_larger_threshold_resumes_past_trailing_misses() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::with_counties(&[1, 5]));
        let crawler = crawler(catalog.clone(), &dir);

        let first = crawler.extend(&options(1, 50, true, 2)).await.unwrap();
        assert_eq!(first.last_id, Some(3));

        // ids 2 and 3 still count: 4 is the third miss, then 5 resets the run
        let report = crawler.extend(&options(1, 50, true, 4)).await.unwrap();

        assert_eq!(report.first_id, Some(4));
        assert_eq!(report.valid, 1);
        assert_eq!(report.last_id, Some(9));
        assert_eq!(report.stop_reason, StopReason::MissThreshold);
        assert_eq!(catalog.requested(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_recrawl_without_append_keeps_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.csv");
        let history = "1,\"County 1, Illinois\",true\n2,\"County 2, Illinois\",true\n3,,false\n";
        std::fs::write(&path, history).unwrap();
        let catalog = Arc::new(FakeCatalog::with_counties(&[1, 2, 3]));
        let crawler = crawler(catalog.clone(), &dir);

        let report = crawler.extend(&options(3, 3, false, 5)).await.unwrap();

        assert_eq!(report.valid, 1);
        assert_eq!(catalog.requested(), vec![3]);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, format!("{}3,\"County 3, Illinois\",true\n", history));
        let entries = crawler.store.load().unwrap();
        assert_eq!(ids(&crawler.store), vec![1, 2, 3]);
        assert_eq!(entries[2], IndexEntry::valid(3, "County 3, Illinois"));
    }

    #[tokio::test]
    async fn test_failed_ctid_is_annotated_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut fake = FakeCatalog::with_counties(&[1, 3]);
        fake.failing.insert(2);
        let crawler = crawler(Arc::new(fake), &dir);

        let report = crawler.extend(&options(1, 3, false, 5)).await.unwrap();

        assert_eq!((report.valid, report.missed, report.errored), (2, 0, 1));
        assert_eq!(report.diagnostics.len(), 1);
        let entries = crawler.store.load().unwrap();
        assert_eq!(entries[1], IndexEntry::error(2));
        assert_eq!(entries[0], IndexEntry::valid(1, "County 1, Illinois"));
    }

    #[tokio::test]
    async fn test_cancel_stops_between_ctids() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::with_counties(&[1, 2, 3]));
        let crawler = crawler(catalog, &dir);

        let report = crawler
            .extend_until(&options(1, 3, false, 5), std::future::ready(()))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.probed(), 0);
    }

    #[test]
    fn test_resume_state() {
        let entries = vec![
            IndexEntry::valid(1, "A, B"),
            IndexEntry::miss(2),
            IndexEntry::error(3),
        ];
        assert_eq!(
            CrawlState::resume(&entries, 1),
            CrawlState { next_id: 4, consecutive_misses: 2 }
        );
        assert_eq!(
            CrawlState::resume(&[], 40),
            CrawlState { next_id: 40, consecutive_misses: 0 }
        );
    }
}
