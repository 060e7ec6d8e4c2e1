//! Download orchestration: bounded-concurrency pagination over any
//! `SourceAdapter`, followed by sort and adjacent-duplicate collapse.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catalog_adapters::{
    AdapterError, ArchiveAdapter, ArchiveOptions, LiveAdapter, LiveOptions, Sanitizer,
    SourceAdapter, DEFAULT_ARCHIVE_ENDPOINT, DEFAULT_LIVE_ENDPOINT,
};
use catalog_core::Course;
use catalog_storage::{DatasetStore, HttpClientConfig, HttpFetcher, StoredDataset};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{AcquireError, Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "catalog-sync";

/// The archive has no data before this academic year.
pub const FIRST_ARCHIVE_YEAR: u32 = 1991;
/// Years from here on are served by the live search API.
pub const FIRST_LIVE_YEAR: u32 = 2023;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub archive_endpoint: String,
    pub live_endpoint: String,
    pub archive_page_size: u32,
    pub archive_concurrency: usize,
    pub live_concurrency: usize,
    pub show_progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            user_agent: "catalog-harvester/0.1".to_string(),
            http_timeout_secs: 60,
            archive_endpoint: DEFAULT_ARCHIVE_ENDPOINT.to_string(),
            live_endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            archive_page_size: 128,
            archive_concurrency: 2,
            live_concurrency: 32,
            show_progress: true,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl DownloadConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("CATALOG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            user_agent: std::env::var("CATALOG_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parsed("CATALOG_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            archive_endpoint: std::env::var("CATALOG_ARCHIVE_ENDPOINT")
                .unwrap_or(defaults.archive_endpoint),
            live_endpoint: std::env::var("CATALOG_LIVE_ENDPOINT").unwrap_or(defaults.live_endpoint),
            archive_page_size: env_parsed("CATALOG_ARCHIVE_PAGE_SIZE", defaults.archive_page_size),
            archive_concurrency: env_parsed(
                "CATALOG_ARCHIVE_CONCURRENCY",
                defaults.archive_concurrency,
            ),
            live_concurrency: env_parsed("CATALOG_LIVE_CONCURRENCY", defaults.live_concurrency),
            show_progress: std::env::var("CATALOG_PROGRESS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.show_progress),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn store(&self) -> DatasetStore {
        DatasetStore::new(self.data_dir.clone())
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("fetching total count: {0}")]
    TotalCount(#[source] AdapterError),
    #[error("upstream reported no results")]
    NoResults,
    #[error("page size must be positive")]
    InvalidPageSize,
    #[error("fetching page {page}: {source}")]
    Page {
        page: u32,
        #[source]
        source: AdapterError,
    },
    #[error("fetch task failed: {0}")]
    Task(#[from] JoinError),
    #[error("admission gate closed: {0}")]
    Gate(#[from] AcquireError),
    #[error("unsupported academic year {year}: {reason}")]
    UnsupportedYear { year: u32, reason: String },
}

/// Pages `1..=pages` needed to cover `total` rows at `page_size` per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    pub total: u64,
    pub page_size: u32,
    pub pages: u32,
}

impl PagePlan {
    pub fn new(total: i64, page_size: u32) -> Result<Self, DownloadError> {
        if page_size == 0 {
            return Err(DownloadError::InvalidPageSize);
        }
        let total = u64::try_from(total)
            .ok()
            .filter(|t| *t > 0)
            .ok_or(DownloadError::NoResults)?;
        let pages = total.div_ceil(u64::from(page_size));
        let pages = u32::try_from(pages).map_err(|_| DownloadError::InvalidPageSize)?;
        Ok(Self {
            total,
            page_size,
            pages,
        })
    }

    pub fn page_numbers(&self) -> RangeInclusive<u32> {
        1..=self.pages
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    /// Maximum fetch tasks in flight at once.
    pub concurrency: usize,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub source: &'static str,
    pub reported_total: u64,
    pub pages: u32,
    pub received: usize,
    pub unique: usize,
}

impl DownloadSummary {
    pub fn duplicates(&self) -> usize {
        self.received - self.unique
    }
}

fn progress_bar(total: u64, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.cyan} [{elapsed_precise}] {wide_bar} {pos}/{len} courses ({eta})",
    ) {
        bar.set_style(style);
    }
    bar
}

/// Sorts by id and merges consecutive equal-id runs into their first member.
pub fn compact(courses: &mut Vec<Course>) {
    courses.sort_by(|a, b| a.id.cmp(&b.id));
    courses.dedup_by(|a, b| a.id == b.id);
}

/// Fetches every page of `adapter` with at most `options.concurrency` requests
/// in flight. The first failure aborts the whole run; outstanding tasks are
/// cancelled when the task set is dropped.
pub async fn paginated_download(
    adapter: Arc<dyn SourceAdapter>,
    options: DownloadOptions,
) -> Result<(Vec<Course>, DownloadSummary), DownloadError> {
    let source = adapter.source_id();
    let total = adapter
        .total_count()
        .await
        .map_err(DownloadError::TotalCount)?;
    let plan = PagePlan::new(total, adapter.page_size())?;
    info!(
        source,
        total = plan.total,
        page_size = plan.page_size,
        pages = plan.pages,
        concurrency = options.concurrency,
        "starting paginated download"
    );

    let progress = progress_bar(plan.total, options.show_progress);
    let gate = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let accumulator = Arc::new(Mutex::new(Vec::<Course>::new()));

    let mut tasks = JoinSet::new();
    for page in plan.page_numbers() {
        let adapter = Arc::clone(&adapter);
        let gate = Arc::clone(&gate);
        let accumulator = Arc::clone(&accumulator);
        let progress = progress.clone();
        tasks.spawn(async move {
            let _permit = gate.acquire_owned().await?;
            let courses = adapter
                .fetch(page)
                .await
                .map_err(|source| DownloadError::Page { page, source })?;
            debug!(page, rows = courses.len(), "page fetched");
            progress.inc(courses.len() as u64);
            accumulator.lock().await.extend(courses);
            Ok::<(), DownloadError>(())
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined? {
            progress.abandon();
            return Err(err);
        }
    }
    progress.finish_and_clear();

    let mut courses = std::mem::take(&mut *accumulator.lock().await);
    let received = courses.len();
    compact(&mut courses);

    let summary = DownloadSummary {
        source,
        reported_total: plan.total,
        pages: plan.pages,
        received,
        unique: courses.len(),
    };
    info!(
        source,
        received = summary.received,
        unique = summary.unique,
        duplicates = summary.duplicates(),
        "download compacted"
    );
    if summary.received as u64 != summary.reported_total {
        warn!(
            source,
            reported = summary.reported_total,
            received = summary.received,
            "received row count differs from reported total"
        );
    }
    Ok((courses, summary))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Archive,
    Live,
}

pub fn source_kind(year: u32) -> Result<SourceKind, DownloadError> {
    match year {
        0 => Err(DownloadError::UnsupportedYear {
            year,
            reason: "a download requires an academic year".to_string(),
        }),
        y if y < FIRST_ARCHIVE_YEAR => Err(DownloadError::UnsupportedYear {
            year,
            reason: format!("the archive starts at {FIRST_ARCHIVE_YEAR}"),
        }),
        y if y < FIRST_LIVE_YEAR => Ok(SourceKind::Archive),
        _ => Ok(SourceKind::Live),
    }
}

/// Picks the adapter and concurrency bound for one academic year.
pub fn select_source(
    year: u32,
    config: &DownloadConfig,
    http: Arc<HttpFetcher>,
    sanitizer: Arc<Sanitizer>,
) -> Result<(Arc<dyn SourceAdapter>, DownloadOptions), DownloadError> {
    let (adapter, concurrency): (Arc<dyn SourceAdapter>, usize) = match source_kind(year)? {
        SourceKind::Archive => (
            Arc::new(ArchiveAdapter::new(
                http,
                sanitizer,
                ArchiveOptions {
                    endpoint: config.archive_endpoint.clone(),
                    year,
                    per_page: config.archive_page_size,
                },
            )),
            config.archive_concurrency,
        ),
        SourceKind::Live => {
            warn!(year, "live catalog only reliably covers the current academic year");
            let adapter = LiveAdapter::new(
                http,
                sanitizer,
                LiveOptions {
                    endpoint: config.live_endpoint.clone(),
                    year,
                },
            )
            .map_err(|e| DownloadError::UnsupportedYear {
                year,
                reason: e.to_string(),
            })?;
            (Arc::new(adapter), config.live_concurrency)
        }
    };
    Ok((
        adapter,
        DownloadOptions {
            concurrency,
            show_progress: config.show_progress,
        },
    ))
}

#[derive(Debug)]
pub struct DownloadReport {
    pub run_id: Uuid,
    pub year: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: DownloadSummary,
    pub dataset: StoredDataset,
}

/// Downloads one academic year and writes `courses-<year>.json`. Nothing is
/// written when any page fails.
pub async fn run_download(year: u32, config: &DownloadConfig) -> Result<DownloadReport> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    info!(%run_id, year, "download started");

    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let sanitizer = Arc::new(Sanitizer::new());
    let (adapter, options) = select_source(year, config, http, sanitizer)?;

    let (courses, summary) = paginated_download(adapter, options)
        .await
        .with_context(|| format!("downloading academic year {year}"))?;

    let store = config.store();
    let dataset = store
        .write_courses(&store.year_path(year), &courses)
        .await
        .with_context(|| format!("saving academic year {year}"))?;

    let finished_at = Utc::now();
    info!(
        %run_id,
        path = %dataset.path.display(),
        records = dataset.records,
        bytes = dataset.byte_size,
        elapsed_ms = (finished_at - started_at).num_milliseconds(),
        "download finished"
    );
    Ok(DownloadReport {
        run_id,
        year,
        started_at,
        finished_at,
        summary,
        dataset,
    })
}

pub async fn run_download_from_env(year: u32) -> Result<DownloadReport> {
    run_download(year, &DownloadConfig::from_env()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog_core::CourseLevel;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn course(id: String) -> Course {
        Course {
            id,
            external_id: 0,
            q_guide_id: 0,
            title: String::new(),
            subject: String::new(),
            subject_description: String::new(),
            catalog_number: String::new(),
            level: CourseLevel::NotApplicable,
            academic_group: String::new(),
            semester: String::new(),
            academic_year: 2020,
            class_section: String::new(),
            component: String::new(),
            description: String::new(),
            instructors: Vec::new(),
            meeting_patterns: Vec::new(),
            gen_ed_area: Vec::new(),
            divisional_dist: Vec::new(),
        }
    }

    /// Serves `total` rows with ids `c000..`; page `overlap_page` starts
    /// `overlap` rows early, repeating the tail of the previous page.
    struct MockAdapter {
        total: i64,
        page_size: u32,
        overlap_page: Option<(u32, usize)>,
        fail_page: Option<u32>,
        calls: std::sync::Mutex<Vec<u32>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockAdapter {
        fn new(total: i64, page_size: u32) -> Self {
            Self {
                total,
                page_size,
                overlap_page: None,
                fail_page: None,
                calls: std::sync::Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for MockAdapter {
        fn source_id(&self) -> &'static str {
            "mock"
        }

        fn page_size(&self) -> u32 {
            self.page_size
        }

        async fn total_count(&self) -> Result<i64, AdapterError> {
            Ok(self.total)
        }

        async fn fetch(&self, page: u32) -> Result<Vec<Course>, AdapterError> {
            self.calls.lock().unwrap().push(page);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_page == Some(page) {
                return Err(AdapterError::Protocol("page size mismatch".into()));
            }

            let size = self.page_size as usize;
            let mut start = (page as usize - 1) * size;
            let end = (start + size).min(self.total as usize);
            if let Some((overlap_page, overlap)) = self.overlap_page {
                if page == overlap_page {
                    start -= overlap;
                }
            }
            // Reverse so arrival order is never already sorted.
            Ok((start..end).rev().map(|i| course(format!("c{i:03}"))).collect())
        }
    }

    fn options(concurrency: usize) -> DownloadOptions {
        DownloadOptions {
            concurrency,
            show_progress: false,
        }
    }

    #[test]
    fn page_plan_rounds_up() {
        let plan = PagePlan::new(130, 64).unwrap();
        assert_eq!(plan.pages, 3);
        assert_eq!(plan.page_numbers().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(PagePlan::new(128, 64).unwrap().pages, 2);
        assert_eq!(PagePlan::new(1, 25).unwrap().pages, 1);
        assert!(matches!(PagePlan::new(0, 64), Err(DownloadError::NoResults)));
        assert!(matches!(PagePlan::new(-3, 64), Err(DownloadError::NoResults)));
        assert!(matches!(
            PagePlan::new(10, 0),
            Err(DownloadError::InvalidPageSize)
        ));
    }

    #[test]
    fn compact_sorts_then_collapses_adjacent_ids() {
        let mut courses = ["b", "a", "c", "a", "b", "a"]
            .into_iter()
            .map(|id| course(id.to_string()))
            .collect::<Vec<_>>();
        compact(&mut courses);
        let ids = courses.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn fetches_each_planned_page_once() {
        let adapter = Arc::new(MockAdapter::new(130, 64));
        let (courses, summary) = paginated_download(adapter.clone(), options(2))
            .await
            .unwrap();

        let mut calls = adapter.calls.lock().unwrap().clone();
        calls.sort_unstable();
        assert_eq!(calls, vec![1, 2, 3]);
        assert_eq!(courses.len(), 130);
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.duplicates(), 0);
        assert!(adapter.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn overlapping_pages_collapse_to_unique_sorted_ids() {
        let mut mock = MockAdapter::new(130, 64);
        mock.overlap_page = Some((2, 5));
        let adapter = Arc::new(mock);
        let (courses, summary) = paginated_download(adapter, options(8)).await.unwrap();

        assert_eq!(summary.received, 135);
        assert_eq!(summary.unique, 130);
        assert_eq!(courses.len(), 130);
        assert!(courses.windows(2).all(|w| w[0].id < w[1].id));
        let ids = courses.iter().map(|c| c.id.clone()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 130);
    }

    #[tokio::test]
    async fn admission_gate_bounds_in_flight_fetches() {
        let adapter = Arc::new(MockAdapter::new(500, 10));
        paginated_download(adapter.clone(), options(3)).await.unwrap();
        let max = adapter.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "saw {max} concurrent fetches");
        assert_eq!(adapter.calls.lock().unwrap().len(), 50);
    }

    #[tokio::test]
    async fn any_page_error_aborts_the_run() {
        let mut mock = MockAdapter::new(130, 64);
        mock.fail_page = Some(2);
        let err = paginated_download(Arc::new(mock), options(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Page {
                page: 2,
                source: AdapterError::Protocol(_)
            }
        ));
    }

    #[tokio::test]
    async fn empty_upstream_aborts_before_fetching() {
        let adapter = Arc::new(MockAdapter::new(0, 64));
        let err = paginated_download(adapter.clone(), options(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NoResults));
        assert!(adapter.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn years_map_to_sources() {
        assert!(matches!(
            source_kind(0),
            Err(DownloadError::UnsupportedYear { year: 0, .. })
        ));
        assert!(source_kind(1990).is_err());
        assert_eq!(source_kind(1991).unwrap(), SourceKind::Archive);
        assert_eq!(source_kind(2022).unwrap(), SourceKind::Archive);
        assert_eq!(source_kind(2023).unwrap(), SourceKind::Live);
    }

    #[test]
    fn select_source_applies_per_source_concurrency() {
        let config = DownloadConfig {
            show_progress: false,
            ..DownloadConfig::default()
        };
        let http = Arc::new(HttpFetcher::new(config.http_client_config()).unwrap());
        let sanitizer = Arc::new(Sanitizer::new());

        let (archive, archive_opts) =
            select_source(2019, &config, http.clone(), sanitizer.clone()).unwrap();
        assert_eq!(archive.source_id(), "archive");
        assert_eq!(archive.page_size(), 128);
        assert_eq!(archive_opts.concurrency, 2);

        let (live, live_opts) = select_source(2024, &config, http.clone(), sanitizer.clone()).unwrap();
        assert_eq!(live.source_id(), "live");
        assert_eq!(live.page_size(), 25);
        assert_eq!(live_opts.concurrency, 32);

        assert!(matches!(
            select_source(2040, &config, http, sanitizer),
            Err(DownloadError::UnsupportedYear { year: 2040, .. })
        ));
    }

    #[tokio::test]
    async fn failed_download_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig {
            data_dir: dir.path().to_path_buf(),
            show_progress: false,
            ..DownloadConfig::default()
        };
        assert!(run_download(1985, &config).await.is_err());
        assert!(!config.store().year_path(1985).exists());
    }
}
