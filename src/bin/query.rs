//! Query binary entry point.
//!
//! Runs one access pattern against the store, or an interactive REPL, with
//! table or JSON output.
//!
//! # Examples
//!
//! Newest papers in a category:
//! ```bash
//! query recent cs.LG --limit 10
//! ```
//!
//! One paper as JSON:
//! ```bash
//! query --format json get 2301.01234v1
//! ```
//!
//! Interactive mode:
//! ```bash
//! query interactive
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use arxiv_paper_store::{
    config::{QueryDefaults, RetryArgs, StoreArgs, StoreSettings},
    keys,
    models::{PaperDetail, PaperSummary},
    query::{Cursor, PaperLookup, PaperQuery, QueryOutcome, QueryRouter, QueryService, RoutedResult},
    retry::RetryPolicy,
    server::PapersResponse,
    storage::ItemStore,
};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for query results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table
    Table,
    /// Same JSON body as the HTTP API
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Newest papers in a category
    Recent {
        category: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Cursor printed by a previous page
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Every paper by an author
    Author {
        /// Author name (case and spacing do not matter)
        #[arg(num_args = 1.., required = true)]
        name: Vec<String>,
    },
    /// Papers tagged with a keyword
    Keyword {
        keyword: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Full record of one paper
    Get { id: String },
    /// Papers in a category published between two days (inclusive)
    Search {
        category: String,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        start: String,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        end: String,
    },
    /// Interactive REPL
    Interactive,
}

/// Query CLI for the denormalized paper store
#[derive(Parser, Debug)]
#[command(
    name = "query",
    version,
    about = "Query papers by category, author, keyword, id or date range",
    long_about = "Runs one access pattern against the store. Each query reads a single partition.

EXAMPLES:
  Newest papers in a category:
    query recent cs.LG --limit 10

  Papers by an author:
    query author Geoffrey Hinton

  Papers in a date window:
    query search cs.LG --start 2023-01-01 --end 2023-01-31

  Interactive mode:
    query interactive"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    retry: RetryArgs,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL", global = true)]
    log_level: String,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Format summaries as a pretty table
fn format_summaries_table(papers: &[PaperSummary]) -> String {
    if papers.is_empty() {
        return "No papers found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("#").add_attribute(Attribute::Bold),
        Cell::new("ID").add_attribute(Attribute::Bold),
        Cell::new("Published").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Authors").add_attribute(Attribute::Bold),
        Cell::new("Categories").add_attribute(Attribute::Bold),
    ]);

    for (idx, paper) in papers.iter().enumerate() {
        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(&paper.id),
            Cell::new(paper.published.format("%Y-%m-%d")),
            Cell::new(truncate(&paper.title, 60)),
            Cell::new(truncate(&paper.authors.join(", "), 40)),
            Cell::new(paper.categories.join(" ")),
        ]);
    }

    table.to_string()
}

/// Display the full record of one paper
fn display_paper_detail(paper: &PaperDetail) {
    println!("\n{}", "═".repeat(80));
    println!("ID: {}", paper.id);
    println!("Title: {}", paper.title);
    println!("Authors: {}", paper.authors.join(", "));
    println!("Categories: {}", paper.categories.join(", "));
    println!("Published: {}", paper.published.to_rfc3339());
    println!("Keywords: {}", paper.keywords.join(", "));
    println!("\nAbstract:\n{}", paper.abstract_text);
    println!("{}", "═".repeat(80));
}

/// Print a routed result; returns the cursor of a paginated listing
fn print_result(result: RoutedResult, format: OutputFormat) -> Result<Option<Cursor>> {
    let cursor = match &result.outcome {
        QueryOutcome::Page(page) => page.next_cursor.clone(),
        _ => None,
    };

    match format {
        OutputFormat::Table => {
            match &result.outcome {
                QueryOutcome::Page(page) => {
                    println!("{}", format_summaries_table(&page.papers));
                    if let Some(next) = &page.next_cursor {
                        println!("Next cursor: {}", next);
                    }
                }
                QueryOutcome::Papers(papers) => println!("{}", format_summaries_table(papers)),
                QueryOutcome::Paper(PaperLookup::Found(detail)) => display_paper_detail(detail),
                QueryOutcome::Paper(PaperLookup::NotFound { id }) => {
                    println!("Paper {} not found.", id)
                }
            }
            println!("\nQuery took {:.2} ms", result.elapsed_ms);
        }
        OutputFormat::Json => match PapersResponse::from_outcome(result.outcome, result.elapsed_ms) {
            Ok(body) => println!(
                "{}",
                serde_json::to_string_pretty(&body).context("Failed to serialize results to JSON")?
            ),
            Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
        },
    }

    Ok(cursor)
}

fn command_to_query(command: Command) -> Result<PaperQuery> {
    Ok(match command {
        Command::Recent {
            category,
            limit,
            cursor,
        } => PaperQuery::RecentInCategory {
            category,
            limit,
            cursor: cursor.map(Cursor::from),
        },
        Command::Author { name } => PaperQuery::ByAuthor {
            author: name.join(" "),
        },
        Command::Keyword { keyword, limit } => PaperQuery::ByKeyword { keyword, limit },
        Command::Get { id } => PaperQuery::ById { id },
        Command::Search {
            category,
            start,
            end,
        } => PaperQuery::CategoryDateRange {
            category,
            start: keys::parse_day(&start)?,
            end: keys::parse_day(&end)?,
        },
        Command::Interactive => anyhow::bail!("interactive mode is not a query"),
    })
}

const REPL_HELP: &str = "Commands:
  <keyword>                  - Papers tagged with a keyword
  /recent CATEGORY [N]       - Newest papers in a category
  /next                      - Next page of the last /recent listing
  /author NAME...            - Every paper by an author
  /keyword KEYWORD [N]       - Papers tagged with a keyword
  /get ID                    - Full record of one paper
  /search CATEGORY START END - Papers between two days (YYYY-MM-DD)
  /count AUTHOR...           - Count an author's papers (not supported by the store)
  /format table|json         - Switch output format
  /help                      - Show this help
  Ctrl+D or Ctrl+C           - Exit";

/// What the REPL should do with one input line.
enum ReplAction {
    Run(PaperQuery),
    Next,
    SetFormat(OutputFormat),
    Help,
}

fn parse_optional_limit(raw: Option<&&str>) -> Result<Option<usize>, String> {
    raw.map(|n| n.parse::<usize>().map_err(|_| format!("Invalid number: {}", n)))
        .transpose()
}

fn parse_repl_line(line: &str) -> Result<ReplAction, String> {
    if !line.starts_with('/') {
        return Ok(ReplAction::Run(PaperQuery::ByKeyword {
            keyword: line.to_string(),
            limit: None,
        }));
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let rest = || parts[1..].join(" ");
    match parts[0] {
        "/help" => Ok(ReplAction::Help),
        "/next" => Ok(ReplAction::Next),
        "/recent" if parts.len() == 2 || parts.len() == 3 => Ok(ReplAction::Run(PaperQuery::RecentInCategory {
            category: parts[1].to_string(),
            limit: parse_optional_limit(parts.get(2))?,
            cursor: None,
        })),
        "/recent" => Err("Usage: /recent CATEGORY [N]".to_string()),
        "/author" if parts.len() >= 2 => Ok(ReplAction::Run(PaperQuery::ByAuthor { author: rest() })),
        "/author" => Err("Usage: /author NAME...".to_string()),
        "/keyword" if parts.len() == 2 || parts.len() == 3 => Ok(ReplAction::Run(PaperQuery::ByKeyword {
            keyword: parts[1].to_string(),
            limit: parse_optional_limit(parts.get(2))?,
        })),
        "/keyword" => Err("Usage: /keyword KEYWORD [N]".to_string()),
        "/get" if parts.len() == 2 => Ok(ReplAction::Run(PaperQuery::ById {
            id: parts[1].to_string(),
        })),
        "/get" => Err("Usage: /get ID".to_string()),
        "/search" if parts.len() == 4 => {
            let start = keys::parse_day(parts[2]).map_err(|e| e.to_string())?;
            let end = keys::parse_day(parts[3]).map_err(|e| e.to_string())?;
            Ok(ReplAction::Run(PaperQuery::CategoryDateRange {
                category: parts[1].to_string(),
                start,
                end,
            }))
        }
        "/search" => Err("Usage: /search CATEGORY START END".to_string()),
        "/count" if parts.len() >= 2 => Ok(ReplAction::Run(PaperQuery::CountByAuthor { author: rest() })),
        "/count" => Err("Usage: /count AUTHOR...".to_string()),
        "/format" => match parts.get(1) {
            Some(&"table") => Ok(ReplAction::SetFormat(OutputFormat::Table)),
            Some(&"json") => Ok(ReplAction::SetFormat(OutputFormat::Json)),
            _ => Err("Usage: /format [table|json]".to_string()),
        },
        other => Err(format!("Unknown command: {}. Type /help for available commands.", other)),
    }
}

/// Last paginated listing and its continuation token
#[derive(Debug, Default)]
struct Listing {
    last: Option<(String, Option<usize>, Cursor)>,
}

impl Listing {
    /// Query for the next page. The token stays until that page is printed,
    /// so a failed `/next` can be repeated.
    fn next_query(&self) -> Option<PaperQuery> {
        self.last
            .as_ref()
            .map(|(category, limit, cursor)| PaperQuery::RecentInCategory {
                category: category.clone(),
                limit: *limit,
                cursor: Some(cursor.clone()),
            })
    }

    /// Remember where a successfully printed listing continues.
    fn record(&mut self, query: PaperQuery, next: Option<Cursor>) {
        if let PaperQuery::RecentInCategory { category, limit, .. } = query {
            self.last = next.map(|cursor| (category, limit, cursor));
        }
    }
}

/// Run interactive REPL mode
async fn run_interactive(service: &dyn QueryService, mut format: OutputFormat) -> Result<()> {
    println!("Interactive Paper Query");
    println!("{}", REPL_HELP);
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut listing = Listing::default();

    loop {
        let line = match rl.readline("Query> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        rl.add_history_entry(line).ok();

        let query = match parse_repl_line(line) {
            Ok(ReplAction::Run(query)) => query,
            Ok(ReplAction::Next) => match listing.next_query() {
                Some(query) => query,
                None => {
                    eprintln!("No further pages; run /recent first");
                    continue;
                }
            },
            Ok(ReplAction::SetFormat(new_format)) => {
                format = new_format;
                println!("Set output format to {:?}", format);
                continue;
            }
            Ok(ReplAction::Help) => {
                println!("{}", REPL_HELP);
                continue;
            }
            Err(message) => {
                eprintln!("{}", message);
                continue;
            }
        };

        match service.route(&query).await {
            Ok(result) => {
                let next = print_result(result, format)?;
                listing.record(query, next);
            }
            Err(e) => eprintln!("Query failed: {}", e),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let settings = StoreSettings::from(&args.store);
    let store = Arc::new(settings.open().await.context("Failed to open store")?);
    info!("Using {} store", store.name());

    let router = QueryRouter::new(store, RetryPolicy::from(&args.retry), QueryDefaults::default());

    match args.command {
        Command::Interactive => run_interactive(&router, args.format).await,
        command => {
            let query = command_to_query(command)?;
            debug!("Routing {:?}", query);
            let result = router
                .route(&query)
                .await
                .context("Query failed")?;
            print_result(result, args.format)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recent(cursor: Option<Cursor>) -> PaperQuery {
        PaperQuery::RecentInCategory {
            category: "cs.LG".to_string(),
            limit: Some(5),
            cursor,
        }
    }

    #[test]
    fn test_next_without_listing() {
        assert_eq!(Listing::default().next_query(), None);
    }

    #[test]
    fn test_next_keeps_cursor_until_page_succeeds() {
        let mut listing = Listing::default();
        listing.record(recent(None), Some(Cursor::from("page-2")));

        let first = listing.next_query();
        assert_eq!(first, Some(recent(Some(Cursor::from("page-2")))));
        // Nothing recorded, as after a failed query: the same page is offered again
        assert_eq!(listing.next_query(), first);

        listing.record(recent(Some(Cursor::from("page-2"))), None);
        assert_eq!(listing.next_query(), None);
    }

    #[test]
    fn test_other_queries_leave_listing_alone() {
        let mut listing = Listing::default();
        listing.record(recent(None), Some(Cursor::from("page-2")));
        listing.record(
            PaperQuery::ById {
                id: "2301.00001".to_string(),
            },
            None,
        );
        assert!(listing.next_query().is_some());
    }
}
