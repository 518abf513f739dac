//! Query routing.
//!
//! Every supported query maps to store operations against exactly one
//! partition: a point read of the canonical item, or a range read of a
//! category, author or keyword partition. A range read follows the store's
//! continuation key until the listing is complete, since a backend may stop
//! a page early (DynamoDB stops at 1 MB). Shapes that would need a join, an
//! aggregation, a scan or a full-text index are refused with
//! [`UnsupportedQuery`] instead of being emulated.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use arxiv_paper_store::query::{PaperLookup, QueryRouter};
//! use arxiv_paper_store::storage::memory::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let router = QueryRouter::new(store, Default::default(), Default::default());
//!
//! let page = router.by_category_recent("cs.LG", Some(10), None).await?;
//! for paper in &page.papers {
//!     println!("{} {}", paper.published, paper.title);
//! }
//!
//! if let PaperLookup::Found(detail) = router.by_id("2301.01234").await? {
//!     println!("{}", detail.abstract_text);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! List queries read the denormalized copies and do not consult the
//! canonical item, so a paper whose ingest is still in flight may appear in a
//! list before `by_id` can see it.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::QueryDefaults;
use crate::keys::{self, ValidationError};
use crate::models::{PaperDetail, PaperSummary};
use crate::retry::{retry_call, Deadline, RetryPolicy};
use crate::storage::{ItemPage, ItemStore, RangeQuery, StoreError};

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed input (empty name, bad cursor, bad limit, inverted range)
    #[error("Invalid query: {0}")]
    Validation(#[from] ValidationError),

    /// The query shape cannot be served by a single partition read
    #[error("Unsupported query: {0}")]
    Unsupported(#[from] UnsupportedQuery),

    /// The store did not answer within the deadline, retries included
    #[error("Store timed out during {operation}: {message}")]
    StoreTimeout {
        operation: &'static str,
        message: String,
    },

    /// Any other store failure
    #[error("Store error during {operation}: {source}")]
    Store {
        operation: &'static str,
        source: StoreError,
    },
}

impl QueryError {
    fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::Timeout(message) => QueryError::StoreTimeout { operation, message },
            source => QueryError::Store { operation, source },
        }
    }
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Query shapes the key layout cannot answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsupportedQuery {
    #[error("counting papers of '{author}' needs aggregation, which the store does not offer")]
    CountByAuthor { author: String },

    #[error("top {k} papers by '{metric}' needs a global index over a mutable metric")]
    TopByMetric { metric: String, k: usize },

    #[error("papers in all of {categories:?} needs a join across category partitions")]
    CategoryIntersection { categories: Vec<String> },

    #[error("substring or fuzzy search for '{text}' needs a full-text index")]
    TextSearch { text: String },
}

/// Opaque pagination token.
///
/// Wraps the partition and the last sort key returned, so a cursor can only
/// resume the listing it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

#[derive(Serialize, Deserialize)]
struct CursorPosition {
    pk: String,
    sk: String,
}

impl Cursor {
    fn encode(pk: &str, sk: &str) -> Self {
        let position = CursorPosition {
            pk: pk.to_string(),
            sk: sk.to_string(),
        };
        // Serializing two strings cannot fail
        let json = serde_json::to_vec(&position).unwrap_or_default();
        Self(URL_SAFE_NO_PAD.encode(json))
    }

    /// Recover the sort key to resume after, checking the partition.
    fn resume_after(&self, pk: &str) -> Result<String, ValidationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|_| ValidationError::InvalidCursor("not a cursor token".to_string()))?;
        let position: CursorPosition = serde_json::from_slice(&bytes)
            .map_err(|_| ValidationError::InvalidCursor("not a cursor token".to_string()))?;
        if position.pk != pk {
            return Err(ValidationError::InvalidCursor(
                "cursor belongs to a different listing".to_string(),
            ));
        }
        Ok(position.sk)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPage {
    pub papers: Vec<PaperSummary>,

    /// Present when more papers may follow
    pub next_cursor: Option<Cursor>,
}

/// Result of a point lookup by id.
#[derive(Debug, Clone, PartialEq)]
pub enum PaperLookup {
    Found(PaperDetail),
    NotFound { id: String },
}

/// Every query shape a caller can express, supported or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperQuery {
    RecentInCategory {
        category: String,
        limit: Option<usize>,
        cursor: Option<Cursor>,
    },
    ByAuthor {
        author: String,
    },
    ByKeyword {
        keyword: String,
        limit: Option<usize>,
    },
    ById {
        id: String,
    },
    CategoryDateRange {
        category: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    CountByAuthor {
        author: String,
    },
    TopByMetric {
        metric: String,
        k: usize,
    },
    CategoryIntersection {
        categories: Vec<String>,
    },
    TextSearch {
        text: String,
    },
}

/// Answer to a routed query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Page(SummaryPage),
    Papers(Vec<PaperSummary>),
    Paper(PaperLookup),
}

/// Routed answer plus how long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedResult {
    pub outcome: QueryOutcome,
    pub elapsed_ms: f64,
}

/// Dispatch seam used by the presentation layer.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Run any query shape, refusing unsupported ones.
    ///
    /// # Errors
    /// Returns `QueryError::Unsupported` without touching the store for
    /// shapes the key layout cannot serve.
    async fn route(&self, query: &PaperQuery) -> QueryResult<RoutedResult>;
}

/// Maps logical queries onto single partition reads.
pub struct QueryRouter<S: ItemStore> {
    store: Arc<S>,
    policy: RetryPolicy,
    defaults: QueryDefaults,
}

impl<S: ItemStore> QueryRouter<S> {
    /// Create a router.
    ///
    /// # Arguments
    /// * `store` - Shared store handle
    /// * `policy` - Retry and deadline settings for every read
    /// * `defaults` - Default and maximum page sizes
    pub fn new(store: Arc<S>, policy: RetryPolicy, defaults: QueryDefaults) -> Self {
        Self {
            store,
            policy,
            defaults,
        }
    }

    fn resolve_limit(&self, limit: Option<usize>) -> Result<usize, ValidationError> {
        match limit {
            None => Ok(self.defaults.default_limit),
            Some(n) if n == 0 || n > self.defaults.max_limit => Err(ValidationError::InvalidLimit {
                limit: n,
                max: self.defaults.max_limit,
            }),
            Some(n) => Ok(n),
        }
    }

    async fn read_page(&self, query: &RangeQuery, deadline: &Deadline) -> QueryResult<ItemPage> {
        debug!("query_range {} (limit {:?})", query.pk, query.limit);
        retry_call(&self.policy, deadline, "Query", || self.store.query_range(query))
            .await
            .map_err(|e| QueryError::from_store("Query", e))
    }

    /// Read a range, following `last_evaluated_sk` until the range is
    /// exhausted or `want` items are collected.
    ///
    /// With `want` set, each read asks for exactly the items still missing and
    /// the returned `last_evaluated_sk` is where a next page would resume.
    /// Without it, `query.limit` is only the size of each read.
    async fn collect_range(&self, mut query: RangeQuery, want: Option<usize>) -> QueryResult<ItemPage> {
        let deadline = self.policy.start();
        let mut items = Vec::new();
        loop {
            if let Some(want) = want {
                query.limit = Some(want - items.len());
            }
            let page = self.read_page(&query, &deadline).await?;
            items.extend(page.items);

            match page.last_evaluated_sk {
                Some(sk) if want.is_some_and(|want| items.len() >= want) => {
                    return Ok(ItemPage {
                        items,
                        last_evaluated_sk: Some(sk),
                    });
                }
                Some(sk) if query.start_after.as_ref() != Some(&sk) => {
                    query.start_after = Some(sk);
                }
                _ => {
                    return Ok(ItemPage {
                        items,
                        last_evaluated_sk: None,
                    });
                }
            }
        }
    }

    /// Most recent papers in a category, newest first.
    ///
    /// # Arguments
    /// * `category` - Category such as `cs.LG`
    /// * `limit` - Page size (default 20, at most the configured maximum)
    /// * `cursor` - Token from a previous page of the same category
    ///
    /// # Errors
    /// Returns `QueryError::Validation` for a blank category, a bad limit, or
    /// a cursor minted for another listing.
    pub async fn by_category_recent(
        &self,
        category: &str,
        limit: Option<usize>,
        cursor: Option<&Cursor>,
    ) -> QueryResult<SummaryPage> {
        let pk = keys::category_partition(category)?;
        let limit = self.resolve_limit(limit)?;

        let mut range = RangeQuery::partition(&pk).descending();
        if let Some(cursor) = cursor {
            range = range.start_after(cursor.resume_after(&pk)?);
        }

        let page = self.collect_range(range, Some(limit)).await?;
        Ok(SummaryPage {
            papers: page.items.iter().map(|item| item.summary()).collect(),
            next_cursor: page.last_evaluated_sk.map(|sk| Cursor::encode(&pk, &sk)),
        })
    }

    /// Every paper by an author, newest first.
    ///
    /// The name is normalized, so spelling variants that differ only in case
    /// or whitespace return the same papers.
    pub async fn by_author(&self, author: &str) -> QueryResult<Vec<PaperSummary>> {
        let pk = keys::author_partition(author)?;
        let page = self
            .collect_range(RangeQuery::partition(pk).descending(), None)
            .await?;
        Ok(page.items.iter().map(|item| item.summary()).collect())
    }

    /// Papers tagged with a keyword, newest first.
    ///
    /// Returns an empty list, not an error, when no paper carries the keyword.
    pub async fn by_keyword(
        &self,
        keyword: &str,
        limit: Option<usize>,
    ) -> QueryResult<Vec<PaperSummary>> {
        let pk = keys::keyword_partition(&keys::normalize_text(keyword))?;
        let limit = self.resolve_limit(limit)?;
        let page = self
            .collect_range(RangeQuery::partition(pk).descending(), Some(limit))
            .await?;
        Ok(page.items.iter().map(|item| item.summary()).collect())
    }

    /// Full record of one paper.
    ///
    /// Only the canonical item is consulted, so a paper whose ingest has not
    /// completed reads as not found.
    pub async fn by_id(&self, id: &str) -> QueryResult<PaperLookup> {
        let key = keys::canonical_key(id)?;
        let deadline = self.policy.start();
        let item = retry_call(&self.policy, &deadline, "GetItem", || {
            self.store.get_item(&key.pk, &key.sk)
        })
        .await
        .map_err(|e| QueryError::from_store("GetItem", e))?;

        Ok(match item.as_ref().and_then(|i| i.canonical()) {
            Some(payload) => PaperLookup::Found(payload.paper.clone()),
            None => PaperLookup::NotFound {
                id: id.trim().to_string(),
            },
        })
    }

    /// Papers in a category published between two days (inclusive), oldest
    /// first.
    ///
    /// Every paper in the window is returned; the configured maximum page
    /// size only bounds each individual store read.
    pub async fn by_category_date_range(
        &self,
        category: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> QueryResult<Vec<PaperSummary>> {
        let pk = keys::category_partition(category)?;
        let (lower, upper) = keys::date_range_bounds(start, end)?;
        let page = self
            .collect_range(
                RangeQuery::partition(pk)
                    .between(lower, upper)
                    .limit(self.defaults.max_limit),
                None,
            )
            .await?;
        Ok(page.items.iter().map(|item| item.summary()).collect())
    }

    async fn dispatch(&self, query: &PaperQuery) -> QueryResult<QueryOutcome> {
        match query {
            PaperQuery::RecentInCategory {
                category,
                limit,
                cursor,
            } => Ok(QueryOutcome::Page(
                self.by_category_recent(category, *limit, cursor.as_ref()).await?,
            )),
            PaperQuery::ByAuthor { author } => Ok(QueryOutcome::Papers(self.by_author(author).await?)),
            PaperQuery::ByKeyword { keyword, limit } => {
                Ok(QueryOutcome::Papers(self.by_keyword(keyword, *limit).await?))
            }
            PaperQuery::ById { id } => Ok(QueryOutcome::Paper(self.by_id(id).await?)),
            PaperQuery::CategoryDateRange {
                category,
                start,
                end,
            } => Ok(QueryOutcome::Papers(
                self.by_category_date_range(category, *start, *end).await?,
            )),
            PaperQuery::CountByAuthor { author } => Err(UnsupportedQuery::CountByAuthor {
                author: author.clone(),
            }
            .into()),
            PaperQuery::TopByMetric { metric, k } => Err(UnsupportedQuery::TopByMetric {
                metric: metric.clone(),
                k: *k,
            }
            .into()),
            PaperQuery::CategoryIntersection { categories } => {
                Err(UnsupportedQuery::CategoryIntersection {
                    categories: categories.clone(),
                }
                .into())
            }
            PaperQuery::TextSearch { text } => {
                Err(UnsupportedQuery::TextSearch { text: text.clone() }.into())
            }
        }
    }
}

#[async_trait]
impl<S: ItemStore> QueryService for QueryRouter<S> {
    async fn route(&self, query: &PaperQuery) -> QueryResult<RoutedResult> {
        let started = Instant::now();
        let outcome = self.dispatch(query).await?;
        Ok(RoutedResult {
            outcome,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
