//! In-process store backed by ordered partitions.
//!
//! Each partition is a `BTreeMap` keyed by sort key, so range reads come back
//! in lexical order exactly like a real key-value table. Partitions live in a
//! `DashMap` so concurrent writers to different partitions never contend.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{ItemPage, ItemStore, RangeQuery, SortKeyCondition, StoreError, StoreResult};
use crate::models::{Item, ItemKind};

/// Concurrent in-memory table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: DashMap<String, BTreeMap<String, Item>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a snapshot written by [`MemoryStore::save_snapshot`].
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the file cannot be read and
    /// `StoreError::Serialization` if it is not a valid snapshot.
    pub async fn load_snapshot(path: &Path) -> StoreResult<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?
        {
            info!("No snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let items: Vec<Item> = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e)))?;

        let store = Self::new();
        for item in items {
            store.insert(item);
        }
        info!(
            "Loaded {} items from snapshot {}",
            store.item_count(),
            path.display()
        );
        Ok(store)
    }

    /// Write every item to a JSON snapshot file.
    pub async fn save_snapshot(&self, path: &Path) -> StoreResult<()> {
        let items = self.all_items();
        let bytes = serde_json::to_vec_pretty(&items)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;

        info!("Saved {} items to snapshot {}", items.len(), path.display());
        Ok(())
    }

    /// Total number of items across all partitions.
    pub fn item_count(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    /// Number of items in one partition.
    pub fn partition_len(&self, pk: &str) -> usize {
        self.partitions.get(pk).map(|p| p.len()).unwrap_or(0)
    }

    /// Item counts per access pattern.
    pub fn count_by_kind(&self) -> HashMap<ItemKind, usize> {
        let mut counts = HashMap::new();
        for partition in self.partitions.iter() {
            for item in partition.value().values() {
                *counts.entry(item.kind).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Every stored item, ordered by partition then sort key.
    pub fn all_items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self
            .partitions
            .iter()
            .flat_map(|p| p.value().values().cloned().collect::<Vec<_>>())
            .collect();
        items.sort_by(|a, b| (&a.pk, &a.sk).cmp(&(&b.pk, &b.sk)));
        items
    }

    fn insert(&self, item: Item) {
        self.partitions
            .entry(item.pk.clone())
            .or_default()
            .insert(item.sk.clone(), item);
    }
}

/// Narrow a lower bound so the range starts strictly after `key`.
fn narrow_lower(current: Bound<String>, key: &str) -> Bound<String> {
    let tighter = matches!(
        &current,
        Bound::Included(lower) | Bound::Excluded(lower) if lower.as_str() > key
    );
    if tighter {
        current
    } else {
        Bound::Excluded(key.to_string())
    }
}

/// Narrow an upper bound so the range ends strictly before `key`.
fn narrow_upper(current: Bound<String>, key: &str) -> Bound<String> {
    let tighter = matches!(
        &current,
        Bound::Included(upper) | Bound::Excluded(upper) if upper.as_str() < key
    );
    if tighter {
        current
    } else {
        Bound::Excluded(key.to_string())
    }
}

/// `BTreeMap::range` panics on inverted or empty-excluded ranges.
fn is_empty_range(lower: &Bound<String>, upper: &Bound<String>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn get_item(&self, pk: &str, sk: &str) -> StoreResult<Option<Item>> {
        Ok(self
            .partitions
            .get(pk)
            .and_then(|partition| partition.get(sk).cloned()))
    }

    async fn put_item(&self, item: &Item) -> StoreResult<()> {
        debug!("put {} / {}", item.pk, item.sk);
        self.insert(item.clone());
        Ok(())
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> StoreResult<()> {
        debug!("delete {} / {}", pk, sk);
        if let Some(mut partition) = self.partitions.get_mut(pk) {
            partition.remove(sk);
        }
        self.partitions.remove_if(pk, |_, partition| partition.is_empty());
        Ok(())
    }

    async fn query_range(&self, query: &RangeQuery) -> StoreResult<ItemPage> {
        let Some(partition) = self.partitions.get(&query.pk) else {
            return Ok(ItemPage::default());
        };

        let (mut lower, mut upper, prefix) = match &query.condition {
            None => (Bound::Unbounded, Bound::Unbounded, None),
            Some(SortKeyCondition::BeginsWith(prefix)) => {
                (Bound::Included(prefix.clone()), Bound::Unbounded, Some(prefix.as_str()))
            }
            Some(SortKeyCondition::Between(low, high)) => {
                (Bound::Included(low.clone()), Bound::Included(high.clone()), None)
            }
        };

        if let Some(resume) = &query.start_after {
            if query.descending {
                upper = narrow_upper(upper, resume);
            } else {
                lower = narrow_lower(lower, resume);
            }
        }

        if is_empty_range(&lower, &upper) {
            return Ok(ItemPage::default());
        }

        let range = partition.range::<String, _>((lower, upper));
        let ordered: Box<dyn Iterator<Item = (&String, &Item)>> = if query.descending {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        let matching = ordered
            .skip_while(|(sk, _)| prefix.is_some_and(|p| !sk.starts_with(p)))
            .take_while(|(sk, _)| prefix.map_or(true, |p| sk.starts_with(p)));

        let limit = query.limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        let mut has_more = false;
        for (_, item) in matching {
            if items.len() == limit {
                has_more = true;
                break;
            }
            items.push(item.clone());
        }

        let last_evaluated_sk = if has_more {
            items.last().map(|item| item.sk.clone())
        } else {
            None
        };

        Ok(ItemPage {
            items,
            last_evaluated_sk,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
