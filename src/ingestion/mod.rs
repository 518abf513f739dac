//! Ingestion pipeline module.
//!
//! Bulk-loads paper metadata into the store. Each source record is validated,
//! turned into a [`Paper`], and handed to the [`WriteCoordinator`], which
//! fans it out into its denormalized items. Papers are written concurrently
//! up to a configurable bound; the outcome of every paper is folded into an
//! [`IngestionStats`] so that one bad record never aborts a run.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use arxiv_paper_store::ingestion::IngestionPipeline;
//! use arxiv_paper_store::provider::json::JsonFilePaperProvider;
//! use arxiv_paper_store::retry::RetryPolicy;
//! use arxiv_paper_store::storage::memory::MemoryStore;
//! use arxiv_paper_store::writer::WriteCoordinator;
//!
//! let store = Arc::new(MemoryStore::new());
//! let writer = Arc::new(WriteCoordinator::new(store, RetryPolicy::default()));
//! let pipeline = IngestionPipeline::new(writer, 8)?;
//!
//! let provider = JsonFilePaperProvider::from_file("papers.json").await?;
//! let stats = pipeline.ingest_from_provider(&provider).await?;
//! println!("Wrote {} papers, multiplier {:.1}", stats.written, stats.storage_multiplier());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::keywords::{KeywordExtractor, StopwordExtractor};
use crate::models::{ItemKind, Paper};
use crate::provider::{PaperProvider, ProviderError, SourceRecord};
use crate::storage::ItemStore;
use crate::writer::{WriteCoordinator, WriteError, WriteReport};

/// Default number of papers written concurrently.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Errors that can occur during ingestion.
///
/// Failures of individual papers are not errors; they are counted in
/// [`IngestionStats`].
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Provider operation failed
    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// Invalid pipeline settings
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// A paper that could not be written, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPaper {
    pub paper_id: String,
    pub reason: String,
}

/// Statistics from an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionStats {
    /// Total number of input records processed
    pub total_processed: usize,

    /// Papers whose full item set was written
    pub written: usize,

    /// Written papers that replaced an earlier version
    pub replaced: usize,

    /// Papers left without a canonical item after a partial write
    pub partial: usize,

    /// Records rejected by validation
    pub invalid: usize,

    /// Papers that failed on a store call outside the item fan-out
    pub failed: usize,

    /// Stale items from replaced versions that could not be removed
    pub residual_items: usize,

    /// Items written, per kind
    pub items_by_kind: BTreeMap<ItemKind, usize>,

    /// Every paper that was not written, in completion order
    pub failures: Vec<FailedPaper>,
}

impl IngestionStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a paper whose item set was fully written.
    pub fn record_written(&mut self, report: &WriteReport) {
        self.total_processed += 1;
        self.written += 1;
        if report.found {
            self.replaced += 1;
        }
        self.residual_items += report.residual.len();
        for key in &report.written {
            *self.items_by_kind.entry(key.kind).or_default() += 1;
        }
    }

    /// Record a paper that ended in a partial write.
    pub fn record_partial(&mut self, paper_id: &str, reason: String) {
        self.total_processed += 1;
        self.partial += 1;
        self.push_failure(paper_id, reason);
    }

    /// Record a record rejected by validation.
    pub fn record_invalid(&mut self, paper_id: &str, reason: String) {
        self.total_processed += 1;
        self.invalid += 1;
        self.push_failure(paper_id, reason);
    }

    /// Record a paper that failed for any other reason.
    pub fn record_failed(&mut self, paper_id: &str, reason: String) {
        self.total_processed += 1;
        self.failed += 1;
        self.push_failure(paper_id, reason);
    }

    fn push_failure(&mut self, paper_id: &str, reason: String) {
        self.failures.push(FailedPaper {
            paper_id: paper_id.to_string(),
            reason,
        });
    }

    /// Fold the outcome of one `put` into the counters.
    pub fn record_outcome(&mut self, paper_id: &str, outcome: &Result<WriteReport, WriteError>) {
        match outcome {
            Ok(report) => self.record_written(report),
            Err(WriteError::Validation(err)) => self.record_invalid(paper_id, err.to_string()),
            Err(err @ WriteError::PartialWrite(_)) => self.record_partial(paper_id, err.to_string()),
            Err(err) => self.record_failed(paper_id, err.to_string()),
        }
    }

    /// Add another run's counters to this one.
    pub fn merge(&mut self, other: IngestionStats) {
        self.total_processed += other.total_processed;
        self.written += other.written;
        self.replaced += other.replaced;
        self.partial += other.partial;
        self.invalid += other.invalid;
        self.failed += other.failed;
        self.residual_items += other.residual_items;
        for (kind, count) in other.items_by_kind {
            *self.items_by_kind.entry(kind).or_default() += count;
        }
        self.failures.extend(other.failures);
    }

    /// Items written of one kind.
    pub fn items_of(&self, kind: ItemKind) -> usize {
        self.items_by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// All items written, canonical included.
    pub fn total_items(&self) -> usize {
        self.items_by_kind.values().sum()
    }

    /// Denormalized copies per written paper (canonical items excluded).
    pub fn storage_multiplier(&self) -> f64 {
        if self.written == 0 {
            return 0.0;
        }
        let copies = self.total_items() - self.items_of(ItemKind::Canonical);
        copies as f64 / self.written as f64
    }
}

/// Ingestion pipeline coordinator.
///
/// Shares its [`WriteCoordinator`] (and therefore its store) with whoever
/// built it, so a binary can reuse the store afterwards, for example to save
/// a snapshot.
pub struct IngestionPipeline<S: ItemStore, K: KeywordExtractor = StopwordExtractor> {
    writer: Arc<WriteCoordinator<S, K>>,
    concurrency: usize,
}

impl<S: ItemStore, K: KeywordExtractor> IngestionPipeline<S, K> {
    /// Create a pipeline writing at most `concurrency` papers at a time.
    ///
    /// # Errors
    /// Returns `IngestionError::InvalidInput` if `concurrency` is zero
    pub fn new(writer: Arc<WriteCoordinator<S, K>>, concurrency: usize) -> IngestionResult<Self> {
        if concurrency == 0 {
            return Err(IngestionError::InvalidInput(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(Self { writer, concurrency })
    }

    /// Ingest a batch of source records.
    ///
    /// Records that fail validation are counted as invalid without touching
    /// the store; the rest are written with bounded concurrency.
    ///
    /// # Arguments
    /// * `records` - Raw records, typically from a [`PaperProvider`]
    ///
    /// # Returns
    /// Statistics about the batch
    pub async fn ingest_batch(&self, records: &[SourceRecord]) -> IngestionStats {
        let mut stats = IngestionStats::new();
        let mut papers = Vec::with_capacity(records.len());

        for record in records {
            match record.to_paper() {
                Ok(paper) => papers.push(paper),
                Err(err) => {
                    warn!("Skipping record '{}': {}", record.id, err);
                    stats.record_invalid(&record.id, err.to_string());
                }
            }
        }

        stats.merge(self.ingest_papers(&papers).await);
        stats
    }

    /// Write already validated papers.
    pub async fn ingest_papers(&self, papers: &[Paper]) -> IngestionStats {
        let writer = &self.writer;
        let outcomes: Vec<_> = stream::iter(papers)
            .map(|paper| async move { (paper.id.as_str(), writer.put(paper).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut stats = IngestionStats::new();
        for (paper_id, outcome) in &outcomes {
            if let Err(err) = outcome {
                warn!("Paper {} not written: {}", paper_id, err);
            }
            stats.record_outcome(paper_id, outcome);
        }
        debug!(
            "Batch of {} papers: {} written, {} partial, {} failed",
            papers.len(),
            stats.written,
            stats.partial,
            stats.failed + stats.invalid
        );
        stats
    }

    /// Ingest every record a provider offers.
    ///
    /// # Errors
    /// Returns `IngestionError::ProviderError` if the provider cannot be read
    pub async fn ingest_from_provider<P>(&self, provider: &P) -> IngestionResult<IngestionStats>
    where
        P: PaperProvider + ?Sized,
    {
        let records = provider.fetch_papers().await?;
        info!("Ingesting {} records from {}", records.len(), provider.name());
        Ok(self.ingest_batch(&records).await)
    }
}
