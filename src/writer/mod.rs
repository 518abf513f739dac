//! Write coordination.
//!
//! The store offers no multi-item transactions, so consistency between a
//! paper's copies comes from ordering alone:
//!
//! 1. Every denormalized item is written first, with the failed subset
//!    retried under the operation deadline.
//! 2. The canonical item is written last, and only if every copy landed.
//!
//! A reader that finds the canonical item may therefore assume all copies
//! exist. Copies without a canonical item mean an ingest is in progress (or
//! failed and was reported as a partial write). Deletes run in the opposite
//! order: canonical first, then the copies it references.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::keys::{self, ValidationError};
use crate::keywords::{KeywordExtractor, StopwordExtractor};
use crate::models::{Item, ItemKind, KeyRef, Paper};
use crate::projector::ItemProjector;
use crate::retry::{retry_call, within_deadline, Deadline, RetryPolicy};
use crate::storage::{ItemStore, StoreError, StoreResult};

/// Errors that can occur while writing or deleting a paper.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The paper is malformed; nothing was written
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Some copies were written, others were not; the canonical item is absent
    #[error("Partial write: {0}")]
    PartialWrite(PartialWriteReport),

    /// A store call outside the item fan-out ran out of time
    #[error("Store timed out during {operation}: {message}")]
    StoreTimeout {
        operation: &'static str,
        message: String,
    },

    /// A store call outside the item fan-out failed
    #[error("Store error during {operation}: {source}")]
    Store {
        operation: &'static str,
        source: StoreError,
    },
}

impl WriteError {
    fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::Timeout(message) => WriteError::StoreTimeout { operation, message },
            source => WriteError::Store { operation, source },
        }
    }
}

/// Result type for write operations.
pub type WriteResult<T> = Result<T, WriteError>;

/// An item write or delete that did not succeed.
///
/// Self-describing so an out-of-band sweep can act on it without any other
/// context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub paper_id: String,
    pub key: KeyRef,
    /// Attempts made before giving up
    pub attempts: u32,
    /// Last error seen
    pub error: String,
}

impl fmt::Display for FailedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (paper {}, {} attempt(s)): {}",
            self.key, self.paper_id, self.attempts, self.error
        )
    }
}

/// Exactly which items of a `put` landed and which did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialWriteReport {
    pub paper_id: String,
    pub succeeded: Vec<KeyRef>,
    pub failed: Vec<FailedItem>,
}

impl PartialWriteReport {
    /// Kinds of the items that failed.
    pub fn failed_kinds(&self) -> BTreeSet<ItemKind> {
        self.failed.iter().map(|f| f.key.kind).collect()
    }
}

impl fmt::Display for PartialWriteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "paper {}: {} item(s) written, {} failed [",
            self.paper_id,
            self.succeeded.len(),
            self.failed.len()
        )?;
        for (i, failed) in self.failed.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failed)?;
        }
        f.write_str("]")
    }
}

/// Outcome of a successful `put` or `delete`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub paper_id: String,

    /// A canonical item existed before this operation
    pub found: bool,

    /// Items written, canonical last
    pub written: Vec<KeyRef>,

    /// Items removed, canonical first
    pub deleted: Vec<KeyRef>,

    /// Items that could not be removed and need a sweep
    pub residual: Vec<FailedItem>,

    /// Store calls that had to be repeated
    pub retries: u32,
}

impl WriteReport {
    fn new(paper_id: &str) -> Self {
        Self {
            paper_id: paper_id.to_string(),
            ..Self::default()
        }
    }

    /// Number of written items of one kind.
    pub fn written_count(&self, kind: ItemKind) -> usize {
        self.written.iter().filter(|k| k.kind == kind).count()
    }
}

/// A single-item store mutation.
enum Mutation<'a> {
    Put(&'a Item),
    Delete(&'a KeyRef),
}

impl Mutation<'_> {
    fn key(&self) -> KeyRef {
        match self {
            Mutation::Put(item) => item.key_ref(),
            Mutation::Delete(key) => (*key).clone(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Mutation::Put(_) => "PutItem",
            Mutation::Delete(_) => "DeleteItem",
        }
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    succeeded: Vec<KeyRef>,
    failed: Vec<FailedItem>,
    retries: u32,
}

/// Removal of a previously stored item set.
#[derive(Debug, Default)]
struct Removal {
    deleted: Vec<KeyRef>,
    residual: Vec<FailedItem>,
    retries: u32,
}

/// Persists and deletes papers as complete item sets.
pub struct WriteCoordinator<S: ItemStore, K: KeywordExtractor = StopwordExtractor> {
    store: Arc<S>,
    projector: ItemProjector<K>,
    policy: RetryPolicy,
}

impl<S: ItemStore> WriteCoordinator<S, StopwordExtractor> {
    /// Create a coordinator with the default keyword extractor.
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self::with_projector(store, ItemProjector::default(), policy)
    }
}

impl<S: ItemStore, K: KeywordExtractor> WriteCoordinator<S, K> {
    /// Create a coordinator with a custom projector.
    ///
    /// # Arguments
    /// * `store` - Shared store handle (also handed to the query router)
    /// * `projector` - Projector used to derive each paper's items
    /// * `policy` - Retry and deadline settings for every operation
    pub fn with_projector(store: Arc<S>, projector: ItemProjector<K>, policy: RetryPolicy) -> Self {
        Self {
            store,
            projector,
            policy,
        }
    }

    /// Write a paper, replacing any earlier version of it.
    ///
    /// An earlier version is removed first (canonical item, then the copies
    /// its back-reference list names) and the new item set is written with
    /// the canonical item last.
    ///
    /// # Errors
    /// - `WriteError::Validation` if the paper cannot be projected; nothing is written
    /// - `WriteError::PartialWrite` if any item still fails after retries;
    ///   the canonical item is not present afterwards
    /// - `WriteError::StoreTimeout` / `WriteError::Store` if looking up or
    ///   removing the earlier version fails
    pub async fn put(&self, paper: &Paper) -> WriteResult<WriteReport> {
        let projected = self.projector.project(paper)?;
        let deadline = self.policy.start();
        let canonical = projected.canonical();
        let mut report = WriteReport::new(&projected.paper_id);

        if let Some(previous) = self.read_canonical(&canonical.pk, &canonical.sk, &deadline).await? {
            debug!("Replacing existing item set for {}", projected.paper_id);
            let removal = self.remove(&previous, &deadline).await?;
            report.found = true;
            report.deleted = removal.deleted;
            report.residual = removal.residual;
            report.retries += removal.retries;
        }

        let copies = self
            .run_batch(
                &projected.paper_id,
                projected.index_items().iter().map(Mutation::Put).collect(),
                &deadline,
            )
            .await;
        report.retries += copies.retries;

        if !copies.failed.is_empty() {
            return Err(self.partial_write(&projected.paper_id, copies.succeeded, copies.failed));
        }

        let last = self
            .run_batch(&projected.paper_id, vec![Mutation::Put(canonical)], &deadline)
            .await;
        report.retries += last.retries;

        if !last.failed.is_empty() {
            return Err(self.partial_write(&projected.paper_id, copies.succeeded, last.failed));
        }

        report.written = copies.succeeded;
        report.written.extend(last.succeeded);

        info!(
            "Wrote paper {} ({} items{})",
            projected.paper_id,
            report.written.len(),
            if report.found { ", replaced" } else { "" }
        );
        Ok(report)
    }

    /// Delete a paper and every copy it references.
    ///
    /// The canonical item goes first so the paper disappears from point
    /// lookups immediately. Copies that cannot be removed are reported in
    /// `residual` rather than failing the call.
    ///
    /// # Returns
    /// A report with `found = false` when no canonical item exists
    pub async fn delete(&self, id: &str) -> WriteResult<WriteReport> {
        let key = keys::canonical_key(id)?;
        let deadline = self.policy.start();
        let mut report = WriteReport::new(id.trim());

        let Some(existing) = self.read_canonical(&key.pk, &key.sk, &deadline).await? else {
            info!("Paper {} not found, nothing to delete", report.paper_id);
            return Ok(report);
        };

        let removal = self.remove(&existing, &deadline).await?;
        report.found = true;
        report.deleted = removal.deleted;
        report.residual = removal.residual;
        report.retries = removal.retries;

        info!(
            "Deleted paper {} ({} items, {} residual)",
            report.paper_id,
            report.deleted.len(),
            report.residual.len()
        );
        Ok(report)
    }

    async fn read_canonical(
        &self,
        pk: &str,
        sk: &str,
        deadline: &Deadline,
    ) -> WriteResult<Option<Item>> {
        retry_call(&self.policy, deadline, "GetItem", || self.store.get_item(pk, sk))
            .await
            .map_err(|e| WriteError::from_store("GetItem", e))
    }

    /// Remove a stored item set: canonical first, then its copies.
    async fn remove(&self, canonical: &Item, deadline: &Deadline) -> WriteResult<Removal> {
        retry_call(&self.policy, deadline, "DeleteItem", || {
            self.store.delete_item(&canonical.pk, &canonical.sk)
        })
        .await
        .map_err(|e| WriteError::from_store("DeleteItem", e))?;

        let mut removal = Removal {
            deleted: vec![canonical.key_ref()],
            ..Removal::default()
        };

        let index_keys = match canonical.canonical() {
            Some(payload) => payload.index_keys.as_slice(),
            None => {
                warn!(
                    "Item {} / {} has no back-reference list, removing it alone",
                    canonical.pk, canonical.sk
                );
                &[] as &[KeyRef]
            }
        };

        let copies = self
            .run_batch(
                &canonical.paper_id,
                index_keys.iter().map(Mutation::Delete).collect(),
                deadline,
            )
            .await;

        for residual in &copies.failed {
            warn!("Residual item left for sweep: {}", residual);
        }
        removal.deleted.extend(copies.succeeded);
        removal.residual = copies.failed;
        removal.retries = copies.retries;
        Ok(removal)
    }

    async fn apply(&self, mutation: &Mutation<'_>) -> StoreResult<()> {
        match mutation {
            Mutation::Put(item) => self.store.put_item(item).await,
            Mutation::Delete(key) => self.store.delete_item(&key.pk, &key.sk).await,
        }
    }

    /// Apply independent single-item mutations concurrently, retrying the
    /// failed subset with backoff until it is empty, attempts run out, or the
    /// deadline leaves no room for another round.
    async fn run_batch(
        &self,
        paper_id: &str,
        mutations: Vec<Mutation<'_>>,
        deadline: &Deadline,
    ) -> BatchOutcome {
        let attempts = self.policy.attempts();
        let mut outcome = BatchOutcome::default();
        let mut pending = mutations;
        let mut attempt = 0;

        while !pending.is_empty() {
            attempt += 1;
            let results = join_all(
                pending
                    .iter()
                    .map(|m| within_deadline(deadline, m.label(), self.apply(m))),
            )
            .await;

            let mut again = Vec::new();
            for (mutation, result) in pending.into_iter().zip(results) {
                match result {
                    Ok(()) => outcome.succeeded.push(mutation.key()),
                    Err(e) if e.is_retryable() => again.push((mutation, e)),
                    Err(e) => outcome.failed.push(failed_item(paper_id, &mutation, attempt, &e)),
                }
            }

            if again.is_empty() {
                break;
            }

            if attempt >= attempts || !self.policy.pause(attempt - 1, deadline).await {
                for (mutation, e) in &again {
                    outcome.failed.push(failed_item(paper_id, mutation, attempt, e));
                }
                break;
            }

            warn!(
                "{} of paper {}'s item call(s) failed on attempt {}, retrying",
                again.len(),
                paper_id,
                attempt
            );
            outcome.retries += again.len() as u32;
            pending = again.into_iter().map(|(mutation, _)| mutation).collect();
        }

        outcome
    }

    fn partial_write(
        &self,
        paper_id: &str,
        succeeded: Vec<KeyRef>,
        failed: Vec<FailedItem>,
    ) -> WriteError {
        let report = PartialWriteReport {
            paper_id: paper_id.to_string(),
            succeeded,
            failed,
        };
        error!("Partial write, canonical item withheld: {}", report);
        WriteError::PartialWrite(report)
    }
}

fn failed_item(paper_id: &str, mutation: &Mutation<'_>, attempts: u32, err: &StoreError) -> FailedItem {
    FailedItem {
        paper_id: paper_id.to_string(),
        key: mutation.key(),
        attempts,
        error: err.to_string(),
    }
}
