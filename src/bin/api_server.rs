//! HTTP API server entry point.
//!
//! Serves the query routes over the configured store until Ctrl-C.
//!
//! # Examples
//!
//! ```bash
//! api_server --port 8080
//! api_server --backend dynamodb --table arxiv-papers --region us-west-2
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use arxiv_paper_store::{
    config::{QueryDefaults, RetryArgs, StoreArgs, StoreSettings, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE},
    query::QueryRouter,
    retry::RetryPolicy,
    server::{run_server, ServerConfig},
    storage::ItemStore,
};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// HTTP API for querying the denormalized paper store
#[derive(Parser, Debug)]
#[command(name = "api_server", version, about = "Serve paper queries over HTTP")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "PAPER_STORE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8080, env = "PAPER_STORE_PORT")]
    port: u16,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    retry: RetryArgs,

    /// Page size when a request gives no limit
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    default_limit: usize,

    /// Largest page size a request may ask for
    #[arg(long, default_value_t = MAX_PAGE_SIZE)]
    max_limit: usize,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level).context("Failed to initialize logging")?;
    debug!("CLI arguments: {:?}", args);

    if args.default_limit == 0 || args.default_limit > args.max_limit {
        anyhow::bail!(
            "--default-limit must be between 1 and --max-limit ({})",
            args.max_limit
        );
    }

    let settings = StoreSettings::from(&args.store);
    let store = Arc::new(settings.open().await.context("Failed to open store")?);
    info!("Serving from {} store", store.name());

    let router = QueryRouter::new(
        store,
        RetryPolicy::from(&args.retry),
        QueryDefaults {
            default_limit: args.default_limit,
            max_limit: args.max_limit,
        },
    );

    let config = ServerConfig {
        host: args.host,
        port: args.port,
    };
    run_server(&config, Arc::new(router))
        .await
        .context("API server failed")?;

    Ok(())
}
