//! HTTP server exposing the tubedrop download API.
//!
//! Thin layer over the library modules: request parsing, dispatch between
//! synchronous single downloads and background batches, and file streaming.
//! Provider and ffmpeg work runs on the blocking pool; batches additionally
//! go through a bounded worker gate so a burst of playlist requests cannot
//! spawn an unbounded number of concurrent downloads.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{fs::File, signal, sync::Semaphore, task};
use tokio_util::io::ReaderStream;

use tubedrop::{
    batch::{BatchContext, BatchRequest, run_batch},
    config,
    convert::{ConvertTarget, convert_file},
    history::{HistoryEntry, HistoryStore, SettingsUpdate, now_millis},
    provider::{
        MediaFormat, MediaInfo, MediaProvider, YtDlp, ensure_program_available,
        looks_like_playlist,
    },
    sanitize::sanitize_filename,
    security::ensure_not_root,
    store::DownloadStore,
    tasks::{DownloadResult, TaskRegistry, TaskState},
};

#[derive(Parser)]
#[command(name = "tubedrop-backend", about = "Web API for media downloads")]
struct Args {
    /// Path to the env-file configuration.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Clone)]
struct AppState {
    provider: Arc<dyn MediaProvider>,
    registry: Arc<TaskRegistry>,
    history: Arc<HistoryStore>,
    store: DownloadStore,
    batch_slots: Arc<Semaphore>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = json!({
            "success": false,
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    ensure_not_root("tubedrop-backend")?;
    let args = Args::parse();
    let cfg = config::load_runtime_config(&args.config)?;

    ensure_program_available("yt-dlp")?;
    if let Err(err) = ensure_program_available("ffmpeg") {
        eprintln!("Warning: {err:#}; /api/convert will fail until ffmpeg is installed");
    }

    let store = DownloadStore::new(cfg.download_root.clone());
    store.ensure()?;

    let state = AppState {
        provider: Arc::new(YtDlp::new(cfg.download_root.clone())),
        registry: Arc::new(TaskRegistry::new()),
        history: Arc::new(HistoryStore::new(cfg.download_root.clone())),
        store,
        batch_slots: Arc::new(Semaphore::new(cfg.max_active_batches.max(1))),
    };

    let app = Router::new()
        .route("/api/info", post(api_info))
        .route("/api/download", post(api_download))
        .route("/api/download/playlist", post(api_download_playlist))
        .route("/api/status/{task_id}", get(api_status))
        .route("/downloads/{filename}", get(serve_download))
        .route("/api/files", get(api_files))
        .route("/api/files/delete", post(api_files_delete))
        .route("/api/history", get(api_history))
        .route("/api/history/clear", post(api_history_clear))
        .route("/api/settings", get(api_settings_get).post(api_settings_post))
        .route("/api/cleanup", post(api_cleanup))
        .route("/api/convert", post(api_convert))
        .route("/api/search", post(api_search))
        .with_state(state);

    let addr = SocketAddr::new(
        cfg.host
            .parse()
            .with_context(|| format!("parsing host {}", cfg.host))?,
        cfg.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!(
        "tubedrop listening on http://{} (store: {})",
        addr,
        cfg.download_root.display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

#[derive(Deserialize)]
struct InfoRequest {
    url: String,
}

async fn api_info(
    State(state): State<AppState>,
    Json(request): Json<InfoRequest>,
) -> ApiResult<Json<Value>> {
    let url = request.url.trim().to_owned();
    if url.is_empty() {
        return Err(ApiError::bad_request("url must not be empty"));
    }
    let provider = state.provider.clone();
    let info = task::spawn_blocking(move || provider.fetch_info(&url))
        .await
        .map_err(join_error)?
        .map_err(provider_error)?;
    Ok(Json(json!({ "success": true, "data": info })))
}

#[derive(Deserialize)]
struct DownloadRequest {
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default = "default_format")]
    format: String,
    #[serde(default = "default_quality")]
    quality: String,
}

fn default_format() -> String {
    "mp3".to_string()
}

fn default_quality() -> String {
    "192".to_string()
}

async fn api_download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<Value>> {
    let urls: Vec<String> = request
        .urls
        .iter()
        .map(|url| url.trim().to_owned())
        .filter(|url| !url.is_empty())
        .collect();
    if urls.is_empty() {
        return Err(ApiError::bad_request("urls must not be empty"));
    }
    let format = MediaFormat::from_request(&request.format);

    if let [url] = urls.as_slice() {
        let url = url.clone();

        if looks_like_playlist(&url) {
            let provider = state.provider.clone();
            let info_url = url.clone();
            let info = task::spawn_blocking(move || provider.fetch_info(&info_url))
                .await
                .map_err(join_error)?
                .map_err(provider_error)?;
            if let MediaInfo::Playlist { title, videos, .. } = info {
                let member_urls: Vec<String> =
                    videos.into_iter().map(|video| video.url).collect();
                let total = member_urls.len();
                let task_id = dispatch_batch(
                    &state,
                    "task",
                    member_urls,
                    format,
                    request.quality,
                    title.clone(),
                    true,
                );
                return Ok(Json(json!({
                    "success": true,
                    "task_id": task_id,
                    "total": total,
                    "playlist_title": title,
                })));
            }
            // A list= URL that resolved to a plain video downloads inline.
        }

        let result = download_single(&state, &url, format, &request.quality).await?;
        return Ok(Json(json!({ "success": true, "data": result })));
    }

    let total = urls.len();
    let task_id = dispatch_batch(
        &state,
        "task",
        urls,
        format,
        request.quality,
        "Multi-Download".to_string(),
        false,
    );
    Ok(Json(json!({
        "success": true,
        "task_id": task_id,
        "total": total,
    })))
}

#[derive(Deserialize)]
struct PlaylistRequest {
    url: String,
    #[serde(default = "default_format")]
    format: String,
    #[serde(default = "default_quality")]
    quality: String,
    #[serde(default)]
    selected: Vec<String>,
}

async fn api_download_playlist(
    State(state): State<AppState>,
    Json(request): Json<PlaylistRequest>,
) -> ApiResult<Json<Value>> {
    let url = request.url.trim().to_owned();
    if url.is_empty() {
        return Err(ApiError::bad_request("url must not be empty"));
    }

    let provider = state.provider.clone();
    let info_url = url.clone();
    let info = task::spawn_blocking(move || provider.fetch_info(&info_url))
        .await
        .map_err(join_error)?
        .map_err(provider_error)?;

    let MediaInfo::Playlist { title, videos, .. } = info else {
        return Err(ApiError::bad_request("URL is not a playlist"));
    };

    let member_urls: Vec<String> = videos
        .into_iter()
        .filter(|video| request.selected.is_empty() || request.selected.contains(&video.id))
        .map(|video| video.url)
        .collect();
    if member_urls.is_empty() {
        return Err(ApiError::bad_request("no matching playlist entries"));
    }

    let total = member_urls.len();
    let format = MediaFormat::from_request(&request.format);
    let task_id = dispatch_batch(
        &state,
        "playlist",
        member_urls,
        format,
        request.quality,
        title.clone(),
        true,
    );
    Ok(Json(json!({
        "success": true,
        "task_id": task_id,
        "total": total,
        "playlist_title": title,
    })))
}

/// Registers a pending task and hands the batch to a worker slot. The task id
/// is pollable immediately; the batch itself starts once a permit frees.
fn dispatch_batch(
    state: &AppState,
    prefix: &str,
    urls: Vec<String>,
    format: MediaFormat,
    quality: String,
    label: String,
    is_playlist: bool,
) -> String {
    let task_id = format!("{prefix}_{}", now_millis());
    state.registry.put(&task_id, TaskState::pending(urls.len()));

    let ctx = BatchContext {
        registry: state.registry.clone(),
        history: state.history.clone(),
        store: state.store.clone(),
    };
    let provider = state.provider.clone();
    let slots = state.batch_slots.clone();
    let request = BatchRequest {
        urls,
        format,
        quality,
        task_id: task_id.clone(),
        label,
        is_playlist,
    };

    tokio::spawn(async move {
        let Ok(_permit) = slots.acquire_owned().await else {
            return;
        };
        let join = task::spawn_blocking(move || run_batch(provider.as_ref(), &ctx, &request)).await;
        if let Err(err) = join {
            eprintln!("batch worker panicked: {err}");
        }
    });

    task_id
}

/// Runs one download on the blocking pool and blocks the response on it.
async fn download_single(
    state: &AppState,
    url: &str,
    format: MediaFormat,
    quality: &str,
) -> ApiResult<DownloadResult> {
    let provider = state.provider.clone();
    let owned_url = url.to_owned();
    let owned_quality = quality.to_owned();
    let done = task::spawn_blocking(move || provider.download(&owned_url, format, &owned_quality))
        .await
        .map_err(join_error)?
        .map_err(provider_error)?;

    let entry = HistoryEntry {
        id: now_millis(),
        title: done.title.clone(),
        filename: done.filename.clone(),
        format: format.extension().to_string(),
        url: url.to_owned(),
        date: chrono::Utc::now().to_rfc3339(),
        is_playlist: false,
        playlist_name: None,
    };
    if let Err(err) = state.history.add_to_history(entry) {
        eprintln!("history write failed: {err:#}");
    }

    Ok(DownloadResult::success(
        done.title,
        done.filename,
        url.to_owned(),
    ))
}

async fn api_status(
    State(state): State<AppState>,
    AxumPath(task_id): AxumPath<String>,
) -> ApiResult<Json<Value>> {
    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ApiError::not_found("task not found"))?;
    Ok(Json(json!({ "success": true, "data": task })))
}

async fn serve_download(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> ApiResult<Response> {
    let path = state
        .store
        .resolve(&filename)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first() {
        if let Ok(value) = mime.to_string().parse() {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    let disposition = format!("attachment; filename=\"{}\"", sanitize_filename(&filename));
    if let Ok(value) = disposition.parse() {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn api_files(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let files = state
        .store
        .list()
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(json!({ "success": true, "files": files })))
}

#[derive(Deserialize)]
struct DeleteRequest {
    filename: String,
}

async fn api_files_delete(
    State(state): State<AppState>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .delete(&request.filename)
        .map_err(|err| ApiError::not_found(err.to_string()))?;
    Ok(Json(json!({ "success": true })))
}

async fn api_history(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let history = state.history.load_history();
    Ok(Json(json!({ "success": true, "history": history })))
}

async fn api_history_clear(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state
        .history
        .clear_history()
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(json!({ "success": true })))
}

async fn api_settings_get(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(
        json!({ "success": true, "settings": state.history.load_settings() }),
    ))
}

async fn api_settings_post(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<Value>> {
    let settings = state
        .history
        .update_settings(update)
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(json!({ "success": true, "settings": settings })))
}

#[derive(Deserialize)]
struct CleanupRequest {
    days: Option<u32>,
}

async fn api_cleanup(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> ApiResult<Json<Value>> {
    let days = request
        .days
        .unwrap_or_else(|| state.history.load_settings().cleanup_days);
    let deleted = state
        .store
        .cleanup_old_files(days)
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

#[derive(Deserialize)]
struct ConvertRequest {
    filename: String,
    target_format: String,
}

async fn api_convert(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> ApiResult<Json<Value>> {
    let target = ConvertTarget::from_request(&request.target_format)
        .ok_or_else(|| ApiError::bad_request("unsupported target format"))?;
    let store = state.store.clone();
    let filename = request.filename.clone();
    let converted = task::spawn_blocking(move || convert_file(&store, &filename, target))
        .await
        .map_err(join_error)?
        .map_err(provider_error)?;
    Ok(Json(json!({ "success": true, "filename": converted })))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_max_results() -> usize {
    10
}

async fn api_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<Value>> {
    let query = request.query.trim().to_owned();
    if query.is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }
    let max_results = request.max_results.clamp(1, 50);
    let provider = state.provider.clone();
    let results = task::spawn_blocking(move || provider.search(&query, max_results))
        .await
        .map_err(join_error)?
        .map_err(provider_error)?;
    Ok(Json(json!({ "success": true, "results": results })))
}

fn join_error(err: task::JoinError) -> ApiError {
    ApiError::internal(format!("task join error: {err}"))
}

fn provider_error(err: anyhow::Error) -> ApiError {
    ApiError::internal(format!("{err:#}"))
}
