//! Runtime configuration.
//!
//! Every knob has a default matching the deployed system (table
//! `arxiv-papers` in `us-west-2`, API on port 8080, 20 results per page) and
//! can be overridden from the command line or a `PAPER_STORE_*` environment
//! variable. The binaries flatten [`StoreArgs`] and [`RetryArgs`] into their
//! own clap parsers.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use tracing::info;

use crate::retry::{
    RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_DEADLINE_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_MS,
};
use crate::storage::memory::MemoryStore;
use crate::storage::{DynamicStore, StoreResult};

pub const DEFAULT_TABLE_NAME: &str = "arxiv-papers";
pub const DEFAULT_REGION: &str = "us-west-2";
pub const DEFAULT_SNAPSHOT_PATH: &str = "paper-store.json";
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Which store implementation to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StoreBackend {
    /// In-process store persisted to a JSON snapshot
    #[default]
    Memory,
    /// Amazon DynamoDB (requires the `dynamodb` feature)
    Dynamodb,
}

/// Store connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Snapshot file for the memory backend
    pub snapshot_path: PathBuf,
    pub table_name: String,
    pub region: String,
    /// Endpoint override, e.g. DynamoDB Local
    pub endpoint: Option<String>,
    /// Per-call timeout applied by the SDK
    pub timeout: Option<Duration>,
    /// Create the table when it is missing
    pub create_table: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            timeout: None,
            create_table: false,
        }
    }
}

impl StoreSettings {
    /// Open the configured store.
    ///
    /// # Errors
    /// Returns `StoreError` if the snapshot cannot be loaded, the table
    /// cannot be created, or the DynamoDB backend was not compiled in.
    pub async fn open(&self) -> StoreResult<DynamicStore> {
        match self.backend {
            StoreBackend::Memory => {
                let store = MemoryStore::load_snapshot(&self.snapshot_path).await?;
                Ok(DynamicStore::Memory(store))
            }
            StoreBackend::Dynamodb => self.open_dynamodb().await,
        }
    }

    #[cfg(feature = "dynamodb")]
    async fn open_dynamodb(&self) -> StoreResult<DynamicStore> {
        use crate::storage::dynamodb::{DynamoDbConfig, DynamoDbStore};

        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let store = DynamoDbStore::new(
            &sdk_config,
            DynamoDbConfig {
                table_name: self.table_name.clone(),
                region: Some(self.region.clone()),
                endpoint: self.endpoint.clone(),
                timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            },
        );
        if self.create_table {
            store.ensure_table().await?;
        }
        info!("Using DynamoDB table {} in {}", self.table_name, self.region);
        Ok(DynamicStore::DynamoDb(store))
    }

    #[cfg(not(feature = "dynamodb"))]
    async fn open_dynamodb(&self) -> StoreResult<DynamicStore> {
        info!("DynamoDB requested for table {}", self.table_name);
        Err(crate::storage::StoreError::Unavailable(
            "DynamoDB support not compiled in; rebuild with --features dynamodb".to_string(),
        ))
    }
}

/// Page size limits applied by the query router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_SIZE,
            max_limit: MAX_PAGE_SIZE,
        }
    }
}

/// Command-line and environment options selecting the store.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Store backend
    #[arg(long, value_enum, default_value_t = StoreBackend::Memory, env = "PAPER_STORE_BACKEND")]
    pub backend: StoreBackend,

    /// Snapshot file used by the memory backend
    #[arg(long, default_value = DEFAULT_SNAPSHOT_PATH, env = "PAPER_STORE_SNAPSHOT")]
    pub snapshot: PathBuf,

    /// DynamoDB table name
    #[arg(long, default_value = DEFAULT_TABLE_NAME, env = "PAPER_STORE_TABLE")]
    pub table: String,

    /// AWS region
    #[arg(long, default_value = DEFAULT_REGION, env = "PAPER_STORE_REGION")]
    pub region: String,

    /// Endpoint override (e.g. http://localhost:8000 for DynamoDB Local)
    #[arg(long, env = "PAPER_STORE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Per-call SDK timeout in milliseconds
    #[arg(long, env = "PAPER_STORE_CALL_TIMEOUT_MS")]
    pub call_timeout_ms: Option<u64>,

    /// Create the DynamoDB table if it does not exist
    #[arg(long, env = "PAPER_STORE_CREATE_TABLE")]
    pub create_table: bool,
}

impl From<&StoreArgs> for StoreSettings {
    fn from(args: &StoreArgs) -> Self {
        Self {
            backend: args.backend,
            snapshot_path: args.snapshot.clone(),
            table_name: args.table.clone(),
            region: args.region.clone(),
            endpoint: args.endpoint.clone(),
            timeout: args.call_timeout_ms.map(Duration::from_millis),
            create_table: args.create_table,
        }
    }
}

/// Command-line and environment options for retries and deadlines.
#[derive(Debug, Clone, Args)]
pub struct RetryArgs {
    /// Attempts per store call, first try included
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "PAPER_STORE_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[arg(long, default_value_t = DEFAULT_BASE_DELAY_MS, env = "PAPER_STORE_BASE_DELAY_MS")]
    pub base_delay_ms: u64,

    /// Cap on a single backoff delay in milliseconds
    #[arg(long, default_value_t = DEFAULT_MAX_DELAY_MS, env = "PAPER_STORE_MAX_DELAY_MS")]
    pub max_delay_ms: u64,

    /// Overall deadline of one operation in milliseconds
    #[arg(long, default_value_t = DEFAULT_DEADLINE_MS, env = "PAPER_STORE_DEADLINE_MS")]
    pub deadline_ms: u64,
}

impl From<&RetryArgs> for RetryPolicy {
    fn from(args: &RetryArgs) -> Self {
        Self {
            max_attempts: args.max_attempts,
            base_delay: Duration::from_millis(args.base_delay_ms),
            max_delay: Duration::from_millis(args.max_delay_ms),
            deadline: Duration::from_millis(args.deadline_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        retry: RetryArgs,
    }

    #[test]
    fn test_defaults_match_deployment() {
        let cli = TestCli::parse_from(["test"]);
        let settings = StoreSettings::from(&cli.store);
        assert_eq!(settings, StoreSettings::default());
        assert_eq!(RetryPolicy::from(&cli.retry), RetryPolicy::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::parse_from([
            "test",
            "--backend",
            "dynamodb",
            "--table",
            "papers-dev",
            "--endpoint",
            "http://localhost:8000",
            "--call-timeout-ms",
            "250",
            "--max-attempts",
            "2",
        ]);
        let settings = StoreSettings::from(&cli.store);
        assert_eq!(settings.backend, StoreBackend::Dynamodb);
        assert_eq!(settings.table_name, "papers-dev");
        assert_eq!(settings.endpoint.as_deref(), Some("http://localhost:8000"));
        assert_eq!(settings.timeout, Some(Duration::from_millis(250)));
        assert_eq!(RetryPolicy::from(&cli.retry).max_attempts, 2);
    }

    #[tokio::test]
    async fn test_open_memory_store_from_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StoreSettings {
            snapshot_path: dir.path().join("store.json"),
            ..StoreSettings::default()
        };
        assert!(matches!(settings.open().await, Ok(DynamicStore::Memory(_))));
    }
}
