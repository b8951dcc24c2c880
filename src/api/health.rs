//! Public health endpoints backed by the lifecycle checks.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::routes::ApiState;
use crate::error::AppError;
use crate::lifecycle::health::{self, CheckKind, CheckResult, HealthReport, HealthStatus};

/// Aggregate report. Answers 503 when any check is critical so plain uptime
/// probes can alert on it.
pub async fn get_health(State(state): State<ApiState>) -> (StatusCode, Json<HealthReport>) {
    let report = health::run_all(&state.pool, state.clock.now_ms()).await;
    let status = match report.status {
        HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report))
}

pub async fn get_check(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<CheckResult>, AppError> {
    let kind = CheckKind::parse(&name)
        .ok_or_else(|| AppError::NotFound(format!("health check '{name}'")))?;
    Ok(Json(health::run_check(&state.pool, kind, state.clock.now_ms()).await))
}
