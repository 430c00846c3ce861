//! Thin HTTP handlers: parse the request, call the control port, shape the
//! response. No engine logic lives here.

use crate::adapters::http::error::ApiError;
use crate::domain::{ExportFilter, ExportJob, QueueView};
use crate::ports::ExportControlPort;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub control: Arc<dyn ExportControlPort>,
}

#[derive(Serialize)]
pub struct OkResponse {
    pub status: &'static str,
    pub message: String,
}

impl OkResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "ok",
            message: message.into(),
        })
    }
}

/// Job descriptor plus the phase-aware progress percentage.
#[derive(Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: ExportJob,
    pub progress: f64,
}

impl From<ExportJob> for JobResponse {
    fn from(job: ExportJob) -> Self {
        let progress = job.progress();
        Self { job, progress }
    }
}

#[derive(Deserialize)]
pub struct CreateQuery {
    pub name: String,
}

pub async fn create_job(
    State(state): State<AppState>,
    Query(query): Query<CreateQuery>,
    Json(filter): Json<ExportFilter>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.control.create_job(&query.name, filter).await?;
    Ok(Json(job.into()))
}

pub async fn start(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.start(&job_id).await?;
    Ok(OkResponse::new("job started"))
}

pub async fn pause(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.pause(&job_id).await?;
    Ok(OkResponse::new("job paused"))
}

pub async fn resume(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.resume(&job_id).await?;
    Ok(OkResponse::new("job resumed"))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.cancel(&job_id).await?;
    Ok(OkResponse::new("job cancelled"))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub remove_files: bool,
}

pub async fn delete(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.delete(&job_id, query.remove_files).await?;
    Ok(OkResponse::new("job deleted"))
}

pub async fn retry_failed(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    let moved = state.control.retry_failed(&job_id).await?;
    Ok(OkResponse::new(format!("{moved} items queued for retry")))
}

pub async fn retry_file(
    State(state): State<AppState>,
    Path((job_id, item_id)): Path<(String, String)>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.retry_item(&job_id, &item_id).await?;
    Ok(OkResponse::new("item queued for retry"))
}

pub async fn pause_item(
    State(state): State<AppState>,
    Path((job_id, item_id)): Path<(String, String)>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.pause_item(&job_id, &item_id).await?;
    Ok(OkResponse::new("item paused"))
}

pub async fn resume_item(
    State(state): State<AppState>,
    Path((job_id, item_id)): Path<(String, String)>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.resume_item(&job_id, &item_id).await?;
    Ok(OkResponse::new("item resumed"))
}

pub async fn cancel_item(
    State(state): State<AppState>,
    Path((job_id, item_id)): Path<(String, String)>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.cancel_item(&job_id, &item_id).await?;
    Ok(OkResponse::new("item skipped"))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.verify(&job_id).await?;
    Ok(OkResponse::new("verification finished"))
}

#[derive(Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    pub full: bool,
}

pub async fn scan(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.rescan(&job_id, query.full).await?;
    let kind = if query.full { "full" } else { "incremental" };
    Ok(OkResponse::new(format!("{kind} scan started")))
}

#[derive(Deserialize)]
pub struct ConcurrencyQuery {
    pub max_concurrent_downloads: usize,
    /// 1 disables parallel-chunk mode; anything above 1 enables it.
    pub parallel_chunk_connections: Option<u32>,
}

pub async fn set_concurrency(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<ConcurrencyQuery>,
) -> Result<Json<OkResponse>, ApiError> {
    let parallel = query.parallel_chunk_connections.map(|n| n > 1);
    state
        .control
        .set_concurrency(&job_id, query.max_concurrent_downloads, parallel)
        .await?;
    Ok(OkResponse::new("concurrency updated"))
}

#[derive(Deserialize)]
pub struct TdlModeQuery {
    pub enabled: bool,
}

pub async fn set_tdl_mode(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<TdlModeQuery>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.set_delegated(&job_id, query.enabled).await?;
    Ok(OkResponse::new(if query.enabled {
        "delegated downloader enabled"
    } else {
        "delegated downloader disabled"
    }))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.control.snapshot(&job_id).await?;
    Ok(Json(job.into()))
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobResponse>> {
    let jobs = state.control.snapshots().await;
    Json(jobs.into_iter().map(JobResponse::from).collect())
}

#[derive(Deserialize)]
pub struct DownloadsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub reversed_order: bool,
}

fn default_limit() -> usize {
    20
}

pub async fn get_downloads(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<DownloadsQuery>,
) -> Result<Json<QueueView>, ApiError> {
    let view = state
        .control
        .queue_view(&job_id, query.limit, query.reversed_order)
        .await?;
    Ok(Json(view))
}
