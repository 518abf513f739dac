//! Key-value store abstraction and implementations.
//!
//! The core only assumes key-value semantics with ordered range reads inside
//! a partition: point get/put/delete plus `query_range`. There are no joins,
//! scans or aggregations.
//!
//! Backends:
//! - [`memory::MemoryStore`]: concurrent in-process table, optionally
//!   persisted to a JSON snapshot file
//! - `dynamodb::DynamoDbStore` (feature `dynamodb`): a single DynamoDB table
//!   keyed by `PK`/`SK`

pub mod memory;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Item;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The call exceeded its deadline and was aborted
    #[error("Store call timed out: {0}")]
    Timeout(String),

    /// The store is rate limiting us
    #[error("Store throttled the request: {0}")]
    Throttled(String),

    /// The store refused the request as malformed or conflicting; permanent
    #[error("Store rejected the request: {0}")]
    Rejected(String),

    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Item could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other unexpected errors
    #[error("Unexpected store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::Throttled(_) | StoreError::Unavailable(_)
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Restriction on the sort keys visited by a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKeyCondition {
    /// Sort key starts with the given prefix
    BeginsWith(String),

    /// Sort key lies between the two bounds, both inclusive
    Between(String, String),
}

/// A range read against exactly one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    /// Partition to read
    pub pk: String,

    /// Optional sort key restriction
    pub condition: Option<SortKeyCondition>,

    /// Visit sort keys from highest to lowest
    pub descending: bool,

    /// Maximum number of items returned
    pub limit: Option<usize>,

    /// Resume after this sort key (exclusive, in the direction of travel)
    pub start_after: Option<String>,
}

impl RangeQuery {
    /// Read the whole partition in ascending sort key order.
    pub fn partition(pk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            condition: None,
            descending: false,
            limit: None,
            start_after: None,
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, sort_key: impl Into<String>) -> Self {
        self.start_after = Some(sort_key.into());
        self
    }

    pub fn begins_with(mut self, prefix: impl Into<String>) -> Self {
        self.condition = Some(SortKeyCondition::BeginsWith(prefix.into()));
        self
    }

    pub fn between(mut self, lower: impl Into<String>, upper: impl Into<String>) -> Self {
        self.condition = Some(SortKeyCondition::Between(lower.into(), upper.into()));
        self
    }
}

/// One page of a range read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    /// Items in the requested order
    pub items: Vec<Item>,

    /// Sort key to resume from, present only when more items may remain
    pub last_evaluated_sk: Option<String>,
}

/// Trait for key-value store backends.
///
/// Implementations provide per-item atomicity only. No operation spans more
/// than one partition, and there is no multi-item transaction.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Point read of one item.
    ///
    /// # Returns
    /// The item, or `None` when no item has these keys
    async fn get_item(&self, pk: &str, sk: &str) -> StoreResult<Option<Item>>;

    /// Insert or fully replace one item.
    async fn put_item(&self, item: &Item) -> StoreResult<()>;

    /// Delete one item. Deleting a missing item is not an error.
    async fn delete_item(&self, pk: &str, sk: &str) -> StoreResult<()>;

    /// Ordered read of a single partition.
    ///
    /// # Arguments
    /// * `query` - Partition, sort key condition, direction, limit and resume point
    async fn query_range(&self, query: &RangeQuery) -> StoreResult<ItemPage>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T> ItemStore for std::sync::Arc<T>
where
    T: ItemStore + ?Sized,
{
    async fn get_item(&self, pk: &str, sk: &str) -> StoreResult<Option<Item>> {
        (**self).get_item(pk, sk).await
    }

    async fn put_item(&self, item: &Item) -> StoreResult<()> {
        (**self).put_item(item).await
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> StoreResult<()> {
        (**self).delete_item(pk, sk).await
    }

    async fn query_range(&self, query: &RangeQuery) -> StoreResult<ItemPage> {
        (**self).query_range(query).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Store selected at runtime by the binaries.
pub enum DynamicStore {
    Memory(memory::MemoryStore),
    #[cfg(feature = "dynamodb")]
    DynamoDb(dynamodb::DynamoDbStore),
}

#[async_trait]
impl ItemStore for DynamicStore {
    async fn get_item(&self, pk: &str, sk: &str) -> StoreResult<Option<Item>> {
        match self {
            DynamicStore::Memory(s) => s.get_item(pk, sk).await,
            #[cfg(feature = "dynamodb")]
            DynamicStore::DynamoDb(s) => s.get_item(pk, sk).await,
        }
    }

    async fn put_item(&self, item: &Item) -> StoreResult<()> {
        match self {
            DynamicStore::Memory(s) => s.put_item(item).await,
            #[cfg(feature = "dynamodb")]
            DynamicStore::DynamoDb(s) => s.put_item(item).await,
        }
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> StoreResult<()> {
        match self {
            DynamicStore::Memory(s) => s.delete_item(pk, sk).await,
            #[cfg(feature = "dynamodb")]
            DynamicStore::DynamoDb(s) => s.delete_item(pk, sk).await,
        }
    }

    async fn query_range(&self, query: &RangeQuery) -> StoreResult<ItemPage> {
        match self {
            DynamicStore::Memory(s) => s.query_range(query).await,
            #[cfg(feature = "dynamodb")]
            DynamicStore::DynamoDb(s) => s.query_range(query).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            DynamicStore::Memory(s) => s.name(),
            #[cfg(feature = "dynamodb")]
            DynamicStore::DynamoDb(s) => s.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Timeout("t".into()).is_retryable());
        assert!(StoreError::Throttled("t".into()).is_retryable());
        assert!(StoreError::Unavailable("t".into()).is_retryable());
        assert!(!StoreError::Rejected("t".into()).is_retryable());
        assert!(!StoreError::Serialization("t".into()).is_retryable());
        assert!(!StoreError::Other("t".into()).is_retryable());
    }

    #[test]
    fn test_range_query_builder() {
        let query = RangeQuery::partition("CATEGORY#cs.LG")
            .descending()
            .limit(5)
            .start_after("2023-01-01T00:00:00Z#a");
        assert_eq!(query.pk, "CATEGORY#cs.LG");
        assert!(query.descending);
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.start_after.as_deref(), Some("2023-01-01T00:00:00Z#a"));
        assert_eq!(query.condition, None);
    }
}
