//! arXiv Paper Store - denormalized multi-access-pattern storage for paper
//! metadata over a key-value store.
//!
//! A key-value store answers exactly one kind of question quickly: "give me
//! the items of this partition, in sort-key order". This crate makes that
//! enough for a paper-discovery service by writing every paper several
//! times, once per access pattern.
//!
//! # Architecture
//!
//! - **models**: Paper records, views and physical items
//! - **keys**: Key scheme (partition prefixes, sortable date keys, normalization)
//! - **keywords**: Keyword extraction from abstracts
//! - **projector**: Fan-out of one paper into its item set
//! - **storage**: The `ItemStore` seam with in-memory and DynamoDB backends
//! - **retry**: Retry policy, backoff and operation deadlines
//! - **writer**: Ordered, retrying writes and deletes of item sets
//! - **query**: Routing of logical queries onto single partition reads
//! - **provider** / **ingestion**: Bulk loading from metadata exports
//! - **config**: Runtime settings shared by the binaries
//! - **server**: HTTP API
//!
//! # Key layout
//!
//! | Partition | Sort key | Access pattern |
//! |-----------|----------|----------------|
//! | `CATEGORY#{category}` | `{published}#{id}` | recent papers in a category |
//! | `AUTHOR#{normalized name}` | `{published}#{id}` | papers by an author |
//! | `KEYWORD#{keyword}` | `{published}#{id}` | papers tagged with a keyword |
//! | `PAPER#{id}` | `PAPER#{id}` | full record by id |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use arxiv_paper_store::{QueryRouter, WriteCoordinator};
//! use arxiv_paper_store::storage::memory::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let writer = WriteCoordinator::new(store.clone(), Default::default());
//!     let router = QueryRouter::new(store, Default::default(), Default::default());
//!
//!     writer.put(&paper).await?;
//!     let page = router.by_category_recent("cs.LG", Some(10), None).await?;
//!     for summary in page.papers {
//!         println!("{} {}", summary.published, summary.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ingestion;
pub mod keys;
pub mod keywords;
pub mod models;
pub mod projector;
pub mod provider;
pub mod query;
pub mod retry;
pub mod server;
pub mod storage;
pub mod writer;

// Re-export commonly used types at the crate root
pub use keys::ValidationError;
pub use models::{Item, ItemKind, Paper, PaperDetail, PaperSummary};
pub use query::{Cursor, PaperLookup, PaperQuery, QueryError, QueryRouter, QueryService};
pub use storage::{ItemStore, StoreError};
pub use writer::{WriteCoordinator, WriteError, WriteReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
