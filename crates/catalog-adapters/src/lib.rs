//! Source adapter contract and the two catalog adapters (archive + live).

use async_trait::async_trait;
use catalog_core::Course;
use catalog_storage::FetchError;
use thiserror::Error;

mod archive;
mod live;
mod normalize;
mod sanitize;

pub use archive::{ArchiveAdapter, ArchiveOptions, DEFAULT_ARCHIVE_ENDPOINT};
pub use live::{
    search_request, term_codes, LiveAdapter, LiveOptions, DEFAULT_LIVE_ENDPOINT, LIVE_PAGE_SIZE,
    SUPPORTED_LIVE_YEARS,
};
pub use normalize::{iso_date, reverse_semester_order, stable_id, to_24hr};
pub use sanitize::Sanitizer;

pub const CRATE_NAME: &str = "catalog-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network failure or non-200 status.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] FetchError),
    /// Response shape did not match the upstream contract.
    #[error("protocol mismatch: {0}")]
    Protocol(String),
    /// Request could not be built for this configuration.
    #[error("unsupported configuration: {0}")]
    Configuration(String),
    /// A field was present but had an unexpected shape.
    #[error("decoding {context}: {message}")]
    Decoding { context: String, message: String },
}

impl AdapterError {
    pub fn decoding(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Decoding {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// A paginated upstream catalog that yields canonical courses.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Fixed number of rows per page for this source.
    fn page_size(&self) -> u32;

    /// Upstream-reported total number of rows.
    async fn total_count(&self) -> Result<i64, AdapterError>;

    /// Fetch and normalize one 1-based page.
    async fn fetch(&self, page: u32) -> Result<Vec<Course>, AdapterError>;
}
