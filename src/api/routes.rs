use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::health::{get_check, get_health};
use crate::api::latency::{JobLatencySummary, JobStats};
use crate::clock::Clock;
use crate::config::CRON_SECRET_HEADER;
use crate::db::models::{JobLockRow, JobRunRow};
use crate::error::AppError;
use crate::lifecycle::repair::{self, OrphanRepair, ReleasedLocks};
use crate::lifecycle::{queue, FinalizeReport};
use crate::scheduler::{JobReport, JobRunner};
use crate::sync::{GameSync, SyncReport};
use crate::types::JobName;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub runner: Arc<JobRunner>,
    pub sync: Arc<GameSync>,
    pub stats: Arc<JobStats>,
    pub clock: Arc<dyn Clock>,
    pub cron_secret: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/health/checks/:name", get(get_check))
        .route("/stats/jobs", get(get_job_stats))
        .route("/lifecycle/finalize", post(post_finalize))
        .route("/lifecycle/repair/stale-locks", post(post_release_stale_locks))
        .route("/lifecycle/repair/orphans", post(post_enqueue_orphans))
        .route("/lifecycle/queue/requeue", post(post_requeue_failed))
        .route("/locks", get(get_locks))
        .route("/locks/:job", delete(delete_lock))
        .route("/admin/sync", post(post_sync))
        .route("/admin/backfill", post(post_backfill))
        .route("/jobs/runs/recent", get(get_recent_runs))
        .with_state(state)
}

/// Shared-secret check for trigger/admin routes. No configured secret means
/// nobody gets in.
fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = state.cron_secret.as_deref().ok_or(AppError::Unauthorized)?;
    let provided = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    if provided.as_bytes() == expected.as_bytes() {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct BackfillQuery {
    pub league: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Deserialize)]
pub struct RecentRunsQuery {
    pub job: Option<String>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct RequeueResponse {
    pub requeued: u64,
}

#[derive(Serialize)]
pub struct ReleaseLockResponse {
    pub job: JobName,
    pub released: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_job_stats(State(state): State<ApiState>) -> Json<Vec<JobLatencySummary>> {
    Json(state.stats.summary())
}

async fn post_finalize(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<FinalizeReport>, AppError> {
    authorize(&state, &headers)?;
    Ok(Json(state.runner.finalize().await))
}

async fn post_release_stale_locks(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ReleasedLocks>, AppError> {
    authorize(&state, &headers)?;
    let out = repair::release_stale_processing_locks(&state.pool, state.clock.now_ms()).await?;
    Ok(Json(out))
}

async fn post_enqueue_orphans(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<OrphanRepair>, AppError> {
    authorize(&state, &headers)?;
    let out = repair::enqueue_orphaned_final_games(&state.pool, state.clock.now_ms()).await?;
    Ok(Json(out))
}

async fn post_requeue_failed(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<RequeueResponse>, AppError> {
    authorize(&state, &headers)?;
    let requeued = queue::requeue_retryable(&state.pool, state.clock.now_ms()).await?;
    Ok(Json(RequeueResponse { requeued }))
}

async fn get_locks(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobLockRow>>, AppError> {
    authorize(&state, &headers)?;
    Ok(Json(state.runner.locks().list().await?))
}

async fn delete_lock(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(job): Path<String>,
) -> Result<Json<ReleaseLockResponse>, AppError> {
    authorize(&state, &headers)?;
    let job = JobName::parse(&job).ok_or_else(|| AppError::NotFound(format!("job '{job}'")))?;
    let released = state.runner.locks().release(job).await?;
    Ok(Json(ReleaseLockResponse { job, released }))
}

async fn post_sync(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<JobReport<SyncReport>>, AppError> {
    authorize(&state, &headers)?;
    let sync = Arc::clone(&state.sync);
    Ok(Json(state.runner.run_locked(JobName::Sync, || async move { sync.sync_today().await }).await))
}

async fn post_backfill(
    State(state): State<ApiState>,
    headers: HeaderMap,
    params: std::result::Result<Query<BackfillQuery>, QueryRejection>,
) -> Result<Json<JobReport<SyncReport>>, AppError> {
    authorize(&state, &headers)?;
    let Query(params) = params.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let sync = Arc::clone(&state.sync);
    let lease = state.runner.lease(JobName::Backfill);
    let report = state
        .runner
        .run_locked(JobName::Backfill, || async move {
            sync.backfill(&params.league, params.from, params.to, &lease).await
        })
        .await;
    Ok(Json(report))
}

async fn get_recent_runs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    params: std::result::Result<Query<RecentRunsQuery>, QueryRejection>,
) -> Result<Json<Vec<JobRunRow>>, AppError> {
    authorize(&state, &headers)?;
    let Query(params) = params.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let rows = match params.job.as_deref() {
        Some(name) => {
            let job = JobName::parse(name)
                .ok_or_else(|| AppError::InvalidInput(format!("unknown job '{name}'")))?;
            sqlx::query_as::<_, JobRunRow>(
                "SELECT * FROM job_runs WHERE job_name = ? ORDER BY started_at DESC, id DESC LIMIT ?",
            )
            .bind(job.as_str())
            .bind(limit)
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, JobRunRow>(
                "SELECT * FROM job_runs ORDER BY started_at DESC, id DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&state.pool)
            .await?
        }
    };

    Ok(Json(rows))
}
