//! Fault-injecting store used by unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::memory::MemoryStore;
use super::{ItemPage, ItemStore, RangeQuery, StoreError, StoreResult};
use crate::models::Item;

struct FailureRule {
    pk_prefix: String,
    remaining: Option<usize>,
    error: StoreError,
}

#[derive(Default)]
struct FlakyState {
    put_failures: Vec<FailureRule>,
    delete_failures: Vec<FailureRule>,
    read_failures: Vec<FailureRule>,
    delay: Option<Duration>,
    page_size: Option<usize>,
    puts: usize,
    deletes: usize,
    reads: usize,
}

fn take_failure(rules: &mut [FailureRule], pk: &str) -> Option<StoreError> {
    let rule = rules
        .iter_mut()
        .find(|r| pk.starts_with(&r.pk_prefix) && r.remaining != Some(0))?;
    if let Some(remaining) = rule.remaining.as_mut() {
        *remaining -= 1;
    }
    Some(rule.error.clone())
}

/// Wraps a [`MemoryStore`] and fails or stalls selected calls.
///
/// Rules match on partition key prefix. `times: None` fails forever.
#[derive(Clone)]
pub(crate) struct FlakyStore {
    inner: Arc<MemoryStore>,
    state: Arc<Mutex<FlakyState>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(MemoryStore::new()),
            state: Arc::new(Mutex::new(FlakyState::default())),
        }
    }

    pub(crate) fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub(crate) fn fail_puts(&self, pk_prefix: &str, times: Option<usize>, error: StoreError) {
        self.state.lock().unwrap().put_failures.push(FailureRule {
            pk_prefix: pk_prefix.to_string(),
            remaining: times,
            error,
        });
    }

    pub(crate) fn fail_deletes(&self, pk_prefix: &str, times: Option<usize>, error: StoreError) {
        self.state.lock().unwrap().delete_failures.push(FailureRule {
            pk_prefix: pk_prefix.to_string(),
            remaining: times,
            error,
        });
    }

    pub(crate) fn fail_reads(&self, pk_prefix: &str, times: Option<usize>, error: StoreError) {
        self.state.lock().unwrap().read_failures.push(FailureRule {
            pk_prefix: pk_prefix.to_string(),
            remaining: times,
            error,
        });
    }

    /// Stall every call for `delay` before doing anything.
    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Cut every range read after `page_size` items, like a backend that
    /// stops a page at a size limit and hands back a continuation key.
    pub(crate) fn set_page_size(&self, page_size: Option<usize>) {
        self.state.lock().unwrap().page_size = page_size;
    }

    pub(crate) fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.put_failures.clear();
        state.delete_failures.clear();
        state.read_failures.clear();
    }

    pub(crate) fn put_calls(&self) -> usize {
        self.state.lock().unwrap().puts
    }

    pub(crate) fn delete_calls(&self) -> usize {
        self.state.lock().unwrap().deletes
    }

    pub(crate) fn read_calls(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    async fn stall(&self) {
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ItemStore for FlakyStore {
    async fn get_item(&self, pk: &str, sk: &str) -> StoreResult<Option<Item>> {
        self.stall().await;
        let failure = {
            let mut state = self.state.lock().unwrap();
            state.reads += 1;
            take_failure(&mut state.read_failures, pk)
        };
        match failure {
            Some(error) => Err(error),
            None => self.inner.get_item(pk, sk).await,
        }
    }

    async fn put_item(&self, item: &Item) -> StoreResult<()> {
        self.stall().await;
        let failure = {
            let mut state = self.state.lock().unwrap();
            state.puts += 1;
            take_failure(&mut state.put_failures, &item.pk)
        };
        match failure {
            Some(error) => Err(error),
            None => self.inner.put_item(item).await,
        }
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> StoreResult<()> {
        self.stall().await;
        let failure = {
            let mut state = self.state.lock().unwrap();
            state.deletes += 1;
            take_failure(&mut state.delete_failures, pk)
        };
        match failure {
            Some(error) => Err(error),
            None => self.inner.delete_item(pk, sk).await,
        }
    }

    async fn query_range(&self, query: &RangeQuery) -> StoreResult<ItemPage> {
        self.stall().await;
        let (failure, page_size) = {
            let mut state = self.state.lock().unwrap();
            state.reads += 1;
            (take_failure(&mut state.read_failures, &query.pk), state.page_size)
        };
        if let Some(error) = failure {
            return Err(error);
        }
        match page_size {
            Some(cap) if query.limit.map_or(true, |limit| limit > cap) => {
                self.inner.query_range(&query.clone().limit(cap)).await
            }
            _ => self.inner.query_range(query).await,
        }
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
