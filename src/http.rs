use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

use crate::config::Config;
use crate::error::{LogEngineError, Result};
use crate::tools::LogToolService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LogToolService>,
    pub sessions: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    error: String,
}

fn error_response(e: &LogEngineError) -> Response {
    let status = match e {
        LogEngineError::Validation(_) => StatusCode::BAD_REQUEST,
        LogEngineError::NotFound(_) => StatusCode::NOT_FOUND,
        LogEngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        LogEngineError::Auth(_) | LogEngineError::Connection(_) => StatusCode::BAD_GATEWAY,
        LogEngineError::Config(_) | LogEngineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { code: e.code(), error: e.to_string() })).into_response()
}

fn json_or_error<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    level: String,
    limit: Option<usize>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    pattern: String,
    level: Option<String>,
    limit: Option<usize>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentsQuery {
    filename: String,
    max_bytes: Option<u64>,
    tail_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobFilesQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobByNameQuery {
    job_name: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobEntriesQuery {
    job_name: String,
    level: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobSearchBody {
    job_name: String,
    pattern: String,
    level: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobSummaryQuery {
    job_name: String,
}

async fn list_files_handler(State(state): State<AppState>) -> Response {
    json_or_error(state.service.list_log_files().await)
}

async fn latest_handler(State(state): State<AppState>, Query(q): Query<LatestQuery>) -> Response {
    json_or_error(state.service.get_latest_logs(&q.level, q.limit, q.date.as_deref()).await)
}

async fn search_handler(State(state): State<AppState>, Json(body): Json<SearchBody>) -> Response {
    json_or_error(
        state
            .service
            .search_logs(&body.pattern, body.level.as_deref(), body.limit, body.date.as_deref())
            .await,
    )
}

async fn contents_handler(
    State(state): State<AppState>,
    Query(q): Query<ContentsQuery>,
) -> Response {
    json_or_error(state.service.get_log_file_contents(&q.filename, q.max_bytes, q.tail_only).await)
}

async fn summary_handler(State(state): State<AppState>, Query(q): Query<SummaryQuery>) -> Response {
    json_or_error(state.service.summarize_logs(q.date.as_deref()).await)
}

async fn job_files_handler(
    State(state): State<AppState>,
    Query(q): Query<JobFilesQuery>,
) -> Response {
    json_or_error(state.service.get_latest_job_log_files(q.limit).await)
}

async fn job_by_name_handler(
    State(state): State<AppState>,
    Query(q): Query<JobByNameQuery>,
) -> Response {
    json_or_error(state.service.search_job_logs_by_name(&q.job_name, q.limit).await)
}

async fn job_entries_handler(
    State(state): State<AppState>,
    Query(q): Query<JobEntriesQuery>,
) -> Response {
    json_or_error(
        state.service.get_job_log_entries(&q.job_name, q.level.as_deref(), q.limit).await,
    )
}

async fn job_search_handler(
    State(state): State<AppState>,
    Json(body): Json<JobSearchBody>,
) -> Response {
    json_or_error(
        state
            .service
            .search_job_logs(&body.job_name, &body.pattern, body.level.as_deref(), body.limit)
            .await,
    )
}

async fn job_summary_handler(
    State(state): State<AppState>,
    Query(q): Query<JobSummaryQuery>,
) -> Response {
    json_or_error(state.service.get_job_execution_summary(&q.job_name).await)
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = format!("{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));

    // MCP SSE transport: first event names the message endpoint.
    let endpoint_url = format!("/message?session_id={session_id}");
    let _ = tx.send(Event::default().event("endpoint").data(endpoint_url));

    state
        .sessions
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(session_id, tx);

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, axum::Error>);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn message_handler(
    State(state): State<AppState>,
    Query(q): Query<MessageQuery>,
    Json(req): Json<crate::mcp::RpcRequest>,
) -> impl IntoResponse {
    let sender = {
        let sessions = state.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.get(&q.session_id).cloned()
    };

    if let Some(sender) = sender {
        let service = state.service.clone();
        tokio::spawn(async move {
            let Some(resp) = crate::mcp::process_request(&service, req).await else {
                return;
            };
            if let Ok(json_str) = serde_json::to_string(&resp) {
                let _ = sender.send(Event::default().event("message").data(json_str));
            }
        });
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

pub fn build_router(service: Arc<LogToolService>) -> Router {
    let state = AppState { service, sessions: Arc::new(RwLock::new(HashMap::new())) };
    Router::new()
        .route("/logs/files", get(list_files_handler))
        .route("/logs/latest", get(latest_handler))
        .route("/logs/search", post(search_handler))
        .route("/logs/file", get(contents_handler))
        .route("/logs/summary", get(summary_handler))
        .route("/jobs/files", get(job_files_handler))
        .route("/jobs/by-name", get(job_by_name_handler))
        .route("/jobs/entries", get(job_entries_handler))
        .route("/jobs/search", post(job_search_handler))
        .route("/jobs/summary", get(job_summary_handler))
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .with_state(state)
}

pub async fn serve_http(service: Arc<LogToolService>, config: &Config) -> Result<()> {
    let router = build_router(service);
    let addr = format!("{}:{}", config.server.http_addr, config.server.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| LogEngineError::Config(format!("bind {addr} failed: {e}")))?;
    info!(%addr, "http server listening");
    axum::serve(listener, router).await.map_err(|e| e.into())
}
