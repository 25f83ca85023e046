#![forbid(unsafe_code)]

//! HTTP and WebSocket surface. Handlers stay thin: they decode the request,
//! call into [`DownloadService`] and map [`Error`] onto a status code with a
//! `{"error": ...}` body.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{
        ConnectInfo, Path as AxumPath, Query, Request, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{Sink, SinkExt, StreamExt};
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::catalog::{DEFAULT_PAGE_SIZE, Page, SessionSummary};
use crate::error::Error;
use crate::fanout::Subscription;
use crate::models::{FormatSpec, JobStatus};
use crate::queue::BatchReceipt;
use crate::ratelimit::LimitedRoute;
use crate::service::{DownloadService, Health};

/// Interval between keep-alive pings on push connections.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

pub type AppState = Arc<DownloadService>;

/// Builds the application router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so rate limits are
/// keyed by the real peer address.
pub fn router(service: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/analyze",
            post(analyze).layer(middleware::from_fn_with_state(
                service.clone(),
                limit_analyze,
            )),
        )
        .route("/api/v1/videos/{session_id}", get(list_videos))
        .route(
            "/api/v1/download",
            post(start_download).layer(middleware::from_fn_with_state(
                service.clone(),
                limit_download,
            )),
        )
        .route("/api/v1/progress/{job_id}", get(get_progress))
        .route("/api/v1/ws/{session_id}", get(ws_handler))
        .route("/api/v1/health", get(health))
        .route("/downloads/{file}", get(download_file))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        )
        .with_state(service)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    retry_after: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let retry_after = match &err {
            Error::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let status = match &err {
            Error::Extraction(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            err if err.is_not_found() => StatusCode::NOT_FOUND,
            err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
            retry_after,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest {
    session_id: String,
    #[serde(default)]
    video_ids: Vec<String>,
    format: Option<String>,
    quality: Option<String>,
}

async fn limit_analyze(State(service): State<AppState>, request: Request, next: Next) -> Response {
    enforce_limit(&service, LimitedRoute::Analyze, request, next).await
}

async fn limit_download(State(service): State<AppState>, request: Request, next: Next) -> Response {
    enforce_limit(&service, LimitedRoute::Download, request, next).await
}

async fn enforce_limit(
    service: &DownloadService,
    route: LimitedRoute,
    request: Request,
    next: Next,
) -> Response {
    match service.admit(route, client_ip(&request)) {
        Ok(()) => next.run(request).await,
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Peer address of the connection. Requests that arrive without connection
/// info (in-process callers) share one bucket.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn analyze(
    State(service): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<SessionSummary>> {
    Ok(Json(service.analyze(&request.url).await?))
}

async fn list_videos(
    State(service): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page>> {
    let page = service.videos(
        &session_id,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    )?;
    Ok(Json(page))
}

async fn start_download(
    State(service): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<BatchReceipt>> {
    let format = FormatSpec::from_request(request.format.as_deref(), request.quality.as_deref())?;
    let receipt = service.submit(&request.session_id, &request.video_ids, format)?;
    Ok(Json(receipt))
}

async fn get_progress(
    State(service): State<AppState>,
    AxumPath(job_id): AxumPath<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(service.progress(&job_id)?))
}

async fn health(State(service): State<AppState>) -> Json<Health> {
    Json(service.health())
}

async fn not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
) -> ApiResult<Response> {
    let subscription = service.subscribe(&session_id)?;
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, subscription)))
}

async fn handle_ws_connection(socket: WebSocket, subscription: Subscription) {
    let session_id = subscription.session_id().to_string();
    info!(session_id = %session_id, "push connection opened");

    let (sender, mut receiver) = socket.split();
    let mut send_task = tokio::spawn(pump_events(sender, subscription, PING_INTERVAL));
    // Client frames carry no commands; reading them only detects the close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!(session_id = %session_id, "push connection closed");
}

/// Forwards session events as JSON text frames, interleaved with pings, until
/// the client goes away or the session's channel closes.
async fn pump_events<S>(mut sink: S, mut subscription: Subscription, ping_every: Duration)
where
    S: Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping unencodable event"),
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn download_file(
    State(service): State<AppState>,
    AxumPath(file): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    ensure_safe_path_segment(&file)?;
    let mut response = stream_file(service.download_dir().join(&file), &headers).await?;
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{file}\"")) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Validates that a single dynamic path segment never escapes its base folder.
fn ensure_safe_path_segment(value: &str) -> ApiResult<()> {
    if value.is_empty()
        || Path::new(value)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }

    Ok(())
}

async fn stream_file(path: PathBuf, headers: &HeaderMap) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    if !metadata.is_file() {
        return Err(ApiError::not_found("file not found"));
    }
    let size = metadata.len();

    let guessed = MimeGuess::from_path(&path).first();
    let range = headers
        .get(header::RANGE)
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, content_range(&format!("bytes */{size}"))?);
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("file not found"))?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            let mut response = body.into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                content_range(&format!("bytes {start}-{end}/{size}"))?,
            );
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn content_range(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| ApiError::internal("invalid content range"))
}

fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let (unit, range) = value.split_once('=')?;
    if unit.trim() != "bytes" {
        return None;
    }
    // Multi-range requests are served as a full response.
    let range = range.trim();
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // "-N": the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    if end_str.is_empty() {
        // Open-ended; a start past the end is answered with 416 by the caller.
        return Some((start, size.saturating_sub(1).max(start)));
    }
    let end: u64 = end_str.parse().ok()?;
    (end >= start).then_some((start, end))
}
