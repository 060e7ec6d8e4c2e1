//! HTTP transport and whole-file dataset persistence for the catalog harvester.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use catalog_core::Course;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, debug_span, info, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "catalog-storage";

const COMBINED_FILE_NAME: &str = "courses.json";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

/// Thin POST client shared by every source adapter. No retries: a failed
/// request surfaces immediately to the caller.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// POST a JSON document.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<FetchedResponse, FetchError> {
        let request = self.client.post(url).json(body);
        self.send(url, "json", request).await
    }

    /// POST an `application/x-www-form-urlencoded` body.
    pub async fn post_form<T: Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
    ) -> Result<FetchedResponse, FetchError> {
        let request = self.client.post(url).form(form);
        self.send(url, "form", request).await
    }

    async fn send(
        &self,
        url: &str,
        encoding: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<FetchedResponse, FetchError> {
        let span = debug_span!("http_request", url, encoding);
        async move {
            let resp = request.send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            // Both upstreams answer 200 on success; anything else is a failure.
            if status != StatusCode::OK {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            debug!(bytes = body.len(), "response received");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct StoredDataset {
    pub path: PathBuf,
    pub records: usize,
    pub byte_size: usize,
}

/// Directory of `courses-<year>.json` files plus the combined `courses.json`.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn year_path(&self, year: u32) -> PathBuf {
        self.root.join(year_file_name(year))
    }

    pub fn combined_path(&self) -> PathBuf {
        self.root.join(COMBINED_FILE_NAME)
    }

    /// Write a JSON array of courses through a temp file and atomic rename, so
    /// a reader never observes a half-written dataset.
    pub async fn write_courses(
        &self,
        path: &Path,
        courses: &[Course],
    ) -> anyhow::Result<StoredDataset> {
        let bytes = serde_json::to_vec(courses).context("serializing courses")?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating dataset directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp dataset file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp dataset file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp dataset file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp dataset {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }

        debug!(path = %path.display(), records = courses.len(), "dataset written");
        Ok(StoredDataset {
            path: path.to_path_buf(),
            records: courses.len(),
            byte_size: bytes.len(),
        })
    }

    pub async fn read_courses(&self, path: &Path) -> anyhow::Result<Vec<Course>> {
        let bytes = fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    /// Per-year dataset files in ascending year order.
    pub async fn year_files(&self) -> anyhow::Result<Vec<(u32, PathBuf)>> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading {}", self.root.display()))?;
        let mut files = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let name = entry.file_name();
            if let Some(year) = name.to_str().and_then(year_from_file_name) {
                files.push((year, entry.path()));
            }
        }
        files.sort_by_key(|(year, _)| *year);
        Ok(files)
    }

    /// Concatenate every per-year file into `courses.json`.
    pub async fn combine(&self) -> anyhow::Result<StoredDataset> {
        let files = self.year_files().await?;
        if files.is_empty() {
            bail!("no courses-<year>.json files found in {}", self.root.display());
        }

        let mut courses = Vec::new();
        for (_, path) in &files {
            let year_courses = self.read_courses(path).await?;
            info!(file = %path.display(), len = year_courses.len(), "combining");
            courses.extend(year_courses);
        }

        let stored = self.write_courses(&self.combined_path(), &courses).await?;
        info!(records = stored.records, path = %stored.path.display(), "wrote combined dataset");
        Ok(stored)
    }

    /// Partition `courses.json` back into per-year files.
    pub async fn split(&self) -> anyhow::Result<Vec<StoredDataset>> {
        let combined = self.combined_path();
        info!(path = %combined.display(), "parsing combined dataset");
        let courses = self.read_courses(&combined).await?;
        let total = courses.len();

        let mut written = Vec::new();
        for (year, year_courses) in group_by_year(courses) {
            let stored = self.write_courses(&self.year_path(year), &year_courses).await?;
            info!(file = %stored.path.display(), len = stored.records, "split");
            written.push(stored);
        }
        info!(records = total, files = written.len(), "split complete");
        Ok(written)
    }
}

pub fn year_file_name(year: u32) -> String {
    format!("courses-{year}.json")
}

/// Parses the year out of `courses-<year>.json`.
pub fn year_from_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("courses-")?.strip_suffix(".json")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn group_by_year(courses: Vec<Course>) -> BTreeMap<u32, Vec<Course>> {
    let mut by_year: BTreeMap<u32, Vec<Course>> = BTreeMap::new();
    for course in courses {
        by_year.entry(course.academic_year).or_default().push(course);
    }
    by_year
}
