//! HTTP API module.
//!
//! Exposes the query router over a small JSON API:
//!
//! | Route | Query |
//! |-------|-------|
//! | `GET /papers/recent?category&limit&cursor` | newest papers in a category |
//! | `GET /papers/author/{name}` | every paper by an author (may contain `/`) |
//! | `GET /papers/keyword/{keyword}?limit` | papers tagged with a keyword |
//! | `GET /papers/search?category&start&end` | papers in a category between two days |
//! | `GET /papers/{id}` | full record of one paper |
//!
//! List responses carry `papers`, `count` and `execution_time_ms`. Errors are
//! returned as `{"error": "..."}` with 400 for bad input, 404 for unknown
//! papers, 422 for query shapes the store cannot serve, 504 for store
//! timeouts and 500 for other store failures.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::keys;
use crate::models::{PaperDetail, PaperSummary};
use crate::query::{Cursor, PaperLookup, PaperQuery, QueryError, QueryOutcome, QueryService};

/// Category used when a request names none.
pub const DEFAULT_CATEGORY: &str = "cs.LG";
/// First day of the default search window.
pub const DEFAULT_SEARCH_START: &str = "2020-01-01";
/// Last day of the default search window.
pub const DEFAULT_SEARCH_END: &str = "2030-12-31";

/// Errors that can occur while serving a request.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The query failed or was refused
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Query string or path could not be decoded
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No paper with this id
    #[error("Paper not found: {0}")]
    NotFound(String),

    /// The listener could not be bound or the server loop failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Query(QueryError::Validation(_)) | ServerError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Query(QueryError::Unsupported(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Query(QueryError::StoreTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Query(QueryError::Store { .. }) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        } else {
            debug!("Request rejected ({}): {}", status, self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Server host address
    pub host: String,

    /// Server port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A paper as it appears in a response body.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PaperView {
    Summary(PaperSummary),
    Detail(PaperDetail),
}

/// Day window echoed back by the search route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateWindow {
    pub start: String,
    pub end: String,
}

/// Body of every successful response.
#[derive(Debug, Clone, Serialize)]
pub struct PapersResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateWindow>,

    pub papers: Vec<PaperView>,

    pub count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,

    pub execution_time_ms: f64,
}

impl PapersResponse {
    /// Shape a routed outcome into a response body.
    ///
    /// # Errors
    /// Returns `ServerError::NotFound` for a lookup that found nothing
    pub fn from_outcome(outcome: QueryOutcome, elapsed_ms: f64) -> ServerResult<Self> {
        let (papers, next_cursor) = match outcome {
            QueryOutcome::Page(page) => (
                page.papers.into_iter().map(PaperView::Summary).collect(),
                page.next_cursor,
            ),
            QueryOutcome::Papers(papers) => (papers.into_iter().map(PaperView::Summary).collect(), None),
            QueryOutcome::Paper(PaperLookup::Found(detail)) => (vec![PaperView::Detail(detail)], None),
            QueryOutcome::Paper(PaperLookup::NotFound { id }) => return Err(ServerError::NotFound(id)),
        };
        Ok(Self::new(papers, next_cursor, elapsed_ms))
    }

    fn new(papers: Vec<PaperView>, next_cursor: Option<Cursor>, elapsed_ms: f64) -> Self {
        Self {
            category: None,
            author: None,
            keyword: None,
            date_range: None,
            count: papers.len(),
            papers,
            next_cursor,
            execution_time_ms: (elapsed_ms * 100.0).round() / 100.0,
        }
    }
}

/// `Query` extractor whose rejection is a JSON `ServerError`.
struct ApiQuery<T>(T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| ApiQuery(value))
            .map_err(|rejection| ServerError::BadRequest(rejection.body_text()))
    }
}

/// `Path` extractor whose rejection is a JSON `ServerError`.
struct ApiPath<T>(T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| ApiPath(value))
            .map_err(|rejection| ServerError::BadRequest(rejection.body_text()))
    }
}

#[derive(Clone)]
struct AppState {
    service: Arc<dyn QueryService>,
}

impl AppState {
    async fn run(&self, query: PaperQuery) -> ServerResult<PapersResponse> {
        let routed = self.service.route(&query).await?;
        PapersResponse::from_outcome(routed.outcome, routed.elapsed_ms)
    }
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    category: Option<String>,
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    category: Option<String>,
    start: Option<String>,
    end: Option<String>,
    /// Free-text search, refused as unsupported
    q: Option<String>,
}

async fn recent_papers(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<RecentParams>,
) -> ServerResult<Json<PapersResponse>> {
    let category = params.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    let mut response = state
        .run(PaperQuery::RecentInCategory {
            category: category.clone(),
            limit: params.limit,
            cursor: params.cursor.map(Cursor::from),
        })
        .await?;
    response.category = Some(category);
    Ok(Json(response))
}

async fn papers_by_author(
    State(state): State<AppState>,
    ApiPath(author): ApiPath<String>,
) -> ServerResult<Json<PapersResponse>> {
    // Wildcard capture, so names may contain '/'
    let author = author.trim_start_matches('/').to_string();
    let mut response = state
        .run(PaperQuery::ByAuthor {
            author: author.clone(),
        })
        .await?;
    response.author = Some(author);
    Ok(Json(response))
}

async fn papers_by_keyword(
    State(state): State<AppState>,
    ApiPath(keyword): ApiPath<String>,
    ApiQuery(params): ApiQuery<LimitParams>,
) -> ServerResult<Json<PapersResponse>> {
    let mut response = state
        .run(PaperQuery::ByKeyword {
            keyword: keyword.clone(),
            limit: params.limit,
        })
        .await?;
    response.keyword = Some(keyword);
    Ok(Json(response))
}

async fn search_papers(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> ServerResult<Json<PapersResponse>> {
    // The router refuses both shapes; its error carries the reason.
    if let Some(text) = params.q {
        return state.run(PaperQuery::TextSearch { text }).await.map(Json);
    }

    let category = params.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    if category.contains(',') {
        let categories = category.split(',').map(|c| c.trim().to_string()).collect();
        return state.run(PaperQuery::CategoryIntersection { categories }).await.map(Json);
    }

    let window = DateWindow {
        start: params.start.unwrap_or_else(|| DEFAULT_SEARCH_START.to_string()),
        end: params.end.unwrap_or_else(|| DEFAULT_SEARCH_END.to_string()),
    };
    let start = keys::parse_day(&window.start).map_err(QueryError::from)?;
    let end = keys::parse_day(&window.end).map_err(QueryError::from)?;

    let mut response = state
        .run(PaperQuery::CategoryDateRange {
            category: category.clone(),
            start,
            end,
        })
        .await?;
    response.category = Some(category);
    response.date_range = Some(window);
    Ok(Json(response))
}

async fn paper_by_id(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ServerResult<Json<PapersResponse>> {
    Ok(Json(state.run(PaperQuery::ById { id }).await?))
}

/// Build the API router around a query service.
pub fn build_router(service: Arc<dyn QueryService>) -> Router {
    Router::new()
        .route("/papers/recent", get(recent_papers))
        .route("/papers/search", get(search_papers))
        .route("/papers/author/*name", get(papers_by_author))
        .route("/papers/keyword/:keyword", get(papers_by_keyword))
        .route("/papers/:id", get(paper_by_id))
        .with_state(AppState { service })
}

/// Serve the API until Ctrl-C.
///
/// # Errors
/// Returns `ServerError::Io` if the address cannot be bound or the server
/// loop fails
pub async fn run_server(config: &ServerConfig, service: Arc<dyn QueryService>) -> ServerResult<()> {
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    let addr: SocketAddr = listener.local_addr()?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
