//! Paper provider module.
//!
//! The `PaperProvider` trait abstracts where raw paper metadata comes from, so
//! the ingestion pipeline can load from a JSON export today and another
//! source later without changing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{self, ValidationError};
use crate::models::Paper;

pub mod json;

/// Errors that can occur when fetching papers from a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to read from the data source
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the data format
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Other provider-specific errors
    #[error("Provider error: {0}")]
    Other(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// One paper as found in source metadata, before validation.
///
/// Field names follow the arXiv export format (`summary` holds the
/// abstract). Missing fields default to empty and are caught when the
/// record is turned into a [`Paper`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default, alias = "abstract")]
    pub summary: String,

    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub published: String,
}

impl SourceRecord {
    /// Validate the record and build a paper from it.
    ///
    /// # Errors
    /// Returns `ValidationError` if the id is blank or the publication date
    /// is missing or unparsable. Authors and categories are checked later by
    /// the projector.
    pub fn to_paper(&self) -> Result<Paper, ValidationError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(ValidationError::EmptyField("id"));
        }

        Ok(Paper {
            id: id.to_string(),
            title: self.title.trim().to_string(),
            authors: self.authors.clone(),
            categories: self.categories.clone(),
            published: keys::parse_published(&self.published)?,
            abstract_text: self.summary.trim().to_string(),
        })
    }
}

/// Trait for sourcing paper metadata.
///
/// # Design Notes
///
/// - Providers hand back raw records; validation happens in the pipeline so a
///   bad record is counted instead of aborting the run
/// - Records do not need to be deduplicated (re-ingesting an id replaces it)
#[async_trait]
pub trait PaperProvider: Send + Sync {
    /// Fetch all available records from this provider.
    ///
    /// # Errors
    /// Returns `ProviderError` if the source cannot be read or parsed
    async fn fetch_papers(&self) -> ProviderResult<Vec<SourceRecord>>;

    /// Fetch at most `limit` records, useful for testing or incremental loads.
    async fn fetch_papers_limit(&self, limit: usize) -> ProviderResult<Vec<SourceRecord>> {
        let all = self.fetch_papers().await?;
        Ok(all.into_iter().take(limit).collect())
    }

    /// Total number of records available, for progress tracking.
    async fn count_papers(&self) -> ProviderResult<usize> {
        self.fetch_papers().await.map(|records| records.len())
    }

    /// Human-readable name of this provider for logging.
    fn name(&self) -> &str;
}
